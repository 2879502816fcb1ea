// Certificates module - Certificate retrieval, parsing and verification

pub mod parser;
pub mod retriever;
pub mod validator;

pub use parser::{CertValues, CertificateInfo, decode_pem, hash_certificate};
pub use retriever::{CertificateFetcher, NetworkFetcher};
pub use validator::{ChainVerifier, hostname_matches, verify_hostname};
