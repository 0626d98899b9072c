
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Int(u64),
    String(String),
    None
}
