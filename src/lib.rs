pub mod discovery {
    tonic::include_proto!("discovery");
}
pub mod gateway {
    tonic::include_proto!("gateway");
}
pub mod config;
pub mod server;
pub mod services;
