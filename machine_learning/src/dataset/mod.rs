mod batch;
mod dataloader;
mod in_memory;

pub use batch::Batch;
pub use dataloader::{Batches, DataLoader, DataLoaders};
pub use in_memory::InMemoryDataset;
