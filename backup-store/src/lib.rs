mod client;
mod credentials;

pub use client::{FailureKind, StoreClient, StoreError};
pub use credentials::{
    CREDENTIALS_FILE_ENV, Credentials, CredentialsError, ENDPOINT_ENV, TOKEN_ENV,
};
