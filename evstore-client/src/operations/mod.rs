//! One-shot request types, one per server command.

mod persistent;
mod read;
mod system;
mod write;

pub use persistent::{
    CreatePersistentSubscription, DeletePersistentSubscription, UpdatePersistentSubscription,
};
pub use read::{ReadAllEvents, ReadEvent, ReadStreamEvents};
pub use system::Ping;
pub use write::{
    AppendToStream, CommitTransaction, DeleteStream, StartTransaction, TransactionalWrite,
};
