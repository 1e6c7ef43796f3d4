pub(crate) mod processor;
pub(crate) mod recorder;
pub(crate) mod sort;
