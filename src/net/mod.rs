pub mod builder;
pub mod codec;
pub mod dispatch;
pub mod inbox;
pub mod protocol;
