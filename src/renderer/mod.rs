pub mod channel;
pub mod device;
pub mod draw_context;
pub mod global_state;
pub mod instance;
pub mod material;
pub mod recording;
pub mod render_op;
pub mod stats;

mod internal;

pub use channel::{ChannelMask, ChannelType, UserDrawItem};
pub use device::{ColourWriteMask, DeviceError, RenderDevice};
pub use draw_context::DrawContext;
pub use global_state::{ApplyMode, ConstantBlock, GlobalStateBlock};
pub use instance::InstanceHandle;
pub use material::{Material, MaterialProperties, OverrideBlock, PropertyValue, RenderingPass};
pub use recording::{DeviceCommand, RecordingDevice};
pub use render_op::{PrimitiveGroup, RenderOp, SingleDrawState};
pub use stats::DrawStatistics;
