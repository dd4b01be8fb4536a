mod service;

pub use service::BufferService;
