//! Operation trait: binds a stable key to a typed payload.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A unit of side-effecting work that can be queued and replayed.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SavePlant { plant_id: u64, name: String }
///
/// impl Operation for SavePlant {
///     const KEY: &'static str = "plants.save.v1";
///     type Output = ();
/// }
/// ```
///
/// The payload is persisted as JSON next to `KEY`; after a restart it is
/// decoded back into `Self`, so replay is checked against the current type.
/// Keep keys versioned and bump them when the payload shape changes.
pub trait Operation: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KEY: &'static str;

    /// Value handed to the entry's success callback.
    type Output: Serialize + Send + 'static;
}
