use crate::error::SimResult;
use crate::sim_if::SIM_IF;
use crate::trigger::Trigger;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimObject {
    pub(crate) handle: usize,
    pub(crate) kind: ObjectKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    /// Unsigned net of the given width.
    Int(u32),
    Hier,
}

impl SimObject {
    pub fn handle(&self) -> usize {
        self.handle
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn name(&self) -> String {
        SIM_IF
            .get_full_name(self)
            .unwrap_or_else(|e| panic!("Couldn't get name of object {}: {}", self.handle, e))
    }

    pub fn size(&self) -> u32 {
        match self.kind {
            ObjectKind::Int(size) => size,
            ObjectKind::Hier => panic!("SimObject {} does not have a size.", self.name()),
        }
    }

    pub fn get_child(&self, name: &str) -> SimResult<Self> {
        let mut child_name = self.name();
        child_name.push('.');
        child_name.push_str(name);
        SimObject::from_name(&child_name)
    }

    pub fn from_name(full_name: &str) -> SimResult<Self> {
        SIM_IF.get_object_by_name(full_name)
    }

    pub fn get_root() -> SimResult<Self> {
        SIM_IF.get_root_object()
    }

    pub fn c(&self, name: &str) -> Self {
        self.get_child(name)
            .unwrap_or_else(|_| panic!("Could not get object with name {}.{}", self.name(), name))
    }

    /// Lanes `name[0]` .. `name[len-1]` of an unpacked array.
    pub fn c_vec(&self, name: &str, len: usize) -> Vec<Self> {
        (0..len).map(|i| self.c(&format!("{}[{}]", name, i))).collect()
    }

    pub fn u64(&self) -> u64 {
        SIM_IF
            .get_value(self)
            .unwrap_or_else(|e| panic!("Can't read {}: {}", self.name(), e))
    }

    pub fn is_high(&self) -> bool {
        self.u64() & 1 == 1
    }

    pub fn try_set(&self, val: u64) -> SimResult {
        SIM_IF.set_value(self, val)
    }

    pub fn set(&self, val: u64) {
        self.try_set(val)
            .unwrap_or_else(|e| panic!("Can't set {} to {}: {}", self.name(), val, e));
    }

    pub fn set_bool(&self, val: bool) {
        self.set(val as u64)
    }

    // convenience functions to get edge triggers for this signal
    pub fn rising_edge(self) -> Trigger {
        Trigger::rising_edge(self)
    }
    pub fn falling_edge(self) -> Trigger {
        Trigger::falling_edge(self)
    }
    pub fn edge(self) -> Trigger {
        Trigger::edge(self)
    }
}
