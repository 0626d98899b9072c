use thiserror::Error;

/// Everything that can go wrong while running a bench.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TbError {
    #[error("{0} already started")]
    AlreadyStarted(String),
    #[error("{0} never started")]
    NotStarted(String),
    #[error("sample {sample} mismatched in {elements} element(s)")]
    Mismatch { sample: usize, elements: usize },
    #[error("handshake violation on {port} at cycle {cycle}: {reason}")]
    ProtocolViolation { port: String, cycle: u64, reason: String },
    #[error("simulation exceeded its budget of {cycles} cycles")]
    Timeout { cycles: u64 },
    #[error("no signal named {0}")]
    SignalNotFound(String),
    #[error("{0} written during the read-only phase")]
    ReadOnlyWrite(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{port}: payload of {got} elements on {lanes} lanes")]
    LaneCount { port: String, lanes: usize, got: usize },
    #[error("ragged matrix: row of {got} elements, expected {expected}")]
    RaggedMatrix { expected: usize, got: usize },
    #[error("timer at step {at} lies in the past (now {now})")]
    TimerInPast { at: u64, now: u64 },
    #[error("cannot multiply {a_rows}x{a_cols} by {b_rows}x{b_cols}")]
    DimensionMismatch {
        a_rows: usize,
        a_cols: usize,
        b_rows: usize,
        b_cols: usize,
    },
    #[error("combinational loop did not settle at time step {time}")]
    Oscillation { time: u64 },
    #[error("task was cancelled before completing")]
    TaskCancelled,
    #[error("test failed: {0}")]
    TestFailed(String),
    #[error("failed to write report: {0}")]
    Report(String),
}

pub type SimResult<T = ()> = Result<T, TbError>;
