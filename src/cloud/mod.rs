//! Provider abstraction for the server and storage operations a template
//! build needs.
//!
//! The pipeline only talks to a [`CloudClient`]; the UpCloud REST client and
//! the in-memory fake used by the tests both implement it.

mod types;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub use types::{
    Account, CreateServerRequest, CreateServerRequestBuilder, IpAccess, IpAddress,
    IpAddressRequest, IpFamily, LoginUser, RequestError, ServerDetails, ServerState,
    StorageDetails, StorageDevice, StorageState, StorageTier, StorageType, TemplatizeRequest,
    WaitTarget,
};

/// Future returned by cloud operations.
pub type CloudFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Error type reported by a [`CloudClient`].
pub trait CloudError: std::error::Error + Send + Sync + 'static {
    /// Returns `true` when the failure is a wait that ran out of time rather
    /// than a rejected or failed request.
    fn is_timeout(&self) -> bool;
}

/// Operations a template build performs against a cloud provider.
///
/// Every method is scoped to a single resource identified by its UUID; zones
/// only matter when creating a server.
pub trait CloudClient: Send + Sync {
    /// Provider specific error type.
    type Error: CloudError;

    /// Fetches the account owning the configured credentials.
    fn get_account(&self) -> CloudFuture<'_, Account, Self::Error>;

    /// Creates a server and returns its details as reported at creation.
    fn create_server<'a>(
        &'a self,
        request: &'a CreateServerRequest,
    ) -> CloudFuture<'a, ServerDetails, Self::Error>;

    /// Fetches the current details of a server.
    fn get_server_details<'a>(&'a self, uuid: &'a str)
    -> CloudFuture<'a, ServerDetails, Self::Error>;

    /// Polls a server until `target` is satisfied or `timeout` elapses.
    fn wait_for_server_state<'a>(
        &'a self,
        uuid: &'a str,
        target: WaitTarget<ServerState>,
        timeout: Duration,
    ) -> CloudFuture<'a, ServerDetails, Self::Error>;

    /// Requests a soft stop of a server.
    fn stop_server<'a>(&'a self, uuid: &'a str) -> CloudFuture<'a, ServerDetails, Self::Error>;

    /// Deletes a stopped server. Attached storage is left in place.
    fn delete_server<'a>(&'a self, uuid: &'a str) -> CloudFuture<'a, (), Self::Error>;

    /// Fetches the current details of a storage device.
    fn get_storage_details<'a>(
        &'a self,
        uuid: &'a str,
    ) -> CloudFuture<'a, StorageDetails, Self::Error>;

    /// Deletes a storage device.
    fn delete_storage<'a>(&'a self, uuid: &'a str) -> CloudFuture<'a, (), Self::Error>;

    /// Converts a detached disk into a new template storage.
    fn templatize_storage<'a>(
        &'a self,
        request: &'a TemplatizeRequest,
    ) -> CloudFuture<'a, StorageDetails, Self::Error>;

    /// Polls a storage device until `target` is satisfied or `timeout`
    /// elapses.
    fn wait_for_storage_state<'a>(
        &'a self,
        uuid: &'a str,
        target: WaitTarget<StorageState>,
        timeout: Duration,
    ) -> CloudFuture<'a, StorageDetails, Self::Error>;
}
