pub use crate::buffer::{BufferPacket, SafeBuffer};
pub use crate::conveyor::{Conveyor, LoopbackConveyor};
pub use crate::errors::Result;
pub use crate::finish::FinishScope;
pub use crate::mailbox::Mailbox;
pub use crate::place::{Place, PlaceKind};
pub use crate::runtime::{
    current_worker_id, end_finish, finish, num_workers, spawn, spawn_async_any, spawn_comm,
    start_finish, Runtime,
};
pub use crate::selector::Selector;
