mod memory;

pub use memory::MemoryTaskStore;
