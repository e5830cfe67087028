pub mod dispatcher;
pub mod event;
pub mod presence;
pub mod registry;
