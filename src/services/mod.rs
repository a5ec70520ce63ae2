//! Service layer. `storage_service` wraps the S3-compatible object store.

pub mod storage_service;

#[cfg(test)]
pub(crate) mod test_support;
