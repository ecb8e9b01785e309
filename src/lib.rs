//! Client-side data-fetching runtime: a normalized cache fed by query
//! responses, plan interpreters that write it and read it back into typed
//! output, and change notification for consumers holding reads.

pub mod env;
pub mod fetch;
pub mod key;
pub mod normalize;
pub mod plan;
pub mod read;
pub mod store;
pub mod subscribe;
pub mod value;

pub type Result<T> = anyhow::Result<T>;

pub use env::{
    Environment, MissingFieldHandler, NetworkFn, install_default, reset_default, with_default,
};
pub use fetch::{digest_hex, ensure_fetched, query_cache_key, resolve};
pub use key::{Argument, ArgumentValue, ensure_arguments_bound, field_key, record_id_of};
pub use normalize::normalize;
pub use plan::{Entrypoint, NormalizationNode, ReaderNode, load_entrypoint, load_variables};
pub use read::{FragmentReference, MissingField, ReadOutcome, ReadValue, read, read_fragment};
pub use store::{Record, RecordState, Store, StoreUpdate};
pub use subscribe::{SubscriberRegistry, SubscriptionToken};
pub use value::{DataId, DataValue, IDENTITY_FIELD, Link, ROOT_ID, Variables};
