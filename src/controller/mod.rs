//! Live session control: who owns the camera, what the operator sees.

pub mod live_controller;
pub mod status;

pub use live_controller::{
    ControlError, ControllerEvent, ControllerHandle, ControllerOptions, LiveCommand,
    LiveComponents, LiveController,
};
pub use status::{LiveMode, LiveStatus, LiveStatusHandle};
