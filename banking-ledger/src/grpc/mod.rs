//! gRPC module for banking-ledger.

mod service;

pub use service::TransactionServiceImpl;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("banking.ledger.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("banking_ledger_descriptor");
}
