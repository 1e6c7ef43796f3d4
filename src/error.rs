use thiserror::Error;

use crate::renderer::device::DeviceError;

/// Failures that cause a single operation (or instancing chain) to be
/// skipped for the current frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawError {
    #[error("failed to begin effect")]
    BeginEffect(#[source] DeviceError),

    #[error("failed to upload {instances} instance transforms")]
    InstanceUpload {
        instances: u32,
        #[source]
        source: DeviceError,
    },

    #[error("failed to create instancing buffer")]
    InstanceBufferCreation(#[source] DeviceError),

    #[error("failed to write sorted triangle indices")]
    TriangleSortUpload(#[source] DeviceError),

    #[error("triangle sort requested for a group without triangles")]
    EmptyTriangleSort,

    #[error("vertex index {max_index} exceeds device limit {limit}")]
    IndexRangeExceeded { max_index: u32, limit: u32 },

    #[error("index {index} references a vertex outside the primitive group")]
    VertexOutOfRange { index: u32 },

    #[error("instance data belongs to a previous frame")]
    StaleInstanceData,
}

pub type DrawResult<T> = Result<T, DrawError>;
