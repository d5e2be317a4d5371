pub mod request_consumer;

pub use request_consumer::RequestConsumer;
