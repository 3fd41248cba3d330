use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SlicerError {
    #[error("No route segments were given for initialization")]
    EmptyInput,
    #[error("The route slicer has not been initialized")]
    NotInitialized,
    #[error("Could not compute route slice: {0}")]
    SliceComputation(String),
    #[error("The route worker is no longer running")]
    WorkerDisconnected,
}
