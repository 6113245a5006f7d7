pub mod fingerprint;
pub mod invalidation;
pub mod output;
pub mod registry;

pub use fingerprint::{Fingerprint, FingerprintError, FINGERPRINT_HEX_LEN};
pub use invalidation::{CacheState, InvalidationPolicy, Memoized};
pub use output::{CaptureReport, OutputCache, RestoreReport};
pub use registry::{
    input_stem, ArtifactSpec, ComputationDescriptor, Invalidation, Registry, RegistryError,
};
