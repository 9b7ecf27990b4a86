mod alternate;
mod concurrency;
mod config;
mod dir;
mod doc;
mod error;
mod event;
mod key;
mod processor;
mod ramcache;
mod stripe;
mod vc;

pub use alternate::{Alternate, AlternateVector};
pub use concurrency::ShardedRwLock;
pub use config::{Config, RamCacheAlgorithm};
pub use dir::{DirEntry, Directory, DirectoryFull, DIR_NIL};
pub use doc::{ChecksumVersion, Doc, DOC_MAGIC};
pub use error::Error;
pub use event::CacheEventCode;
pub use key::CryptoKey;
pub use processor::{CacheProcessor, VOL_HASH_TABLE_SIZE};
pub use ramcache::{ClfusRamCache, LruRamCache, RamCache, ShardedLruRamCache};
pub use stripe::agg::{AggAdmission, AggregationBuffer, EvacuatorBudget, MAX_FRAG_SIZE};
pub use stripe::evac::Evacuator;
pub use stripe::header::{DiskHeader, StripeDescriptor, StripeHeader};
pub use stripe::{ReadOutcome, Stripe};
pub use vc::{CacheVC, VcContinuation, VcFlags, VcOp};
