//! Kardex storage and index engine.
//!
//! An embedded, single-process indexed record store in the style of VMS
//! indexed file I/O. One file holds a data heap and reserved index blocks;
//! search keys derived from record bytes are kept in memory as per-key
//! sorted slot arrays and compared with a raw byte compare over
//! order-preserving encoded keys.
//!
//! ```text
//! +------------------------------------------------------------+
//! |                         Store                              |
//! |   create / open / close / rebuild                          |
//! |   create_record / get_record / exist_record / get_next_*   |
//! |   delete_record / update_record                            |
//! +-------+--------------------+-------------------+-----------+
//!         |                    |                   |
//!         v                    v                   v
//!   +-----------+      +-------------+      +-----------+
//!   | KeyIndex  |      |  SlotImage  |      | StoreFile |
//!   | (sorted   |      | (in-memory  |      | (byte-    |
//!   |  arrays)  |      |  entries)   |      |  offset)  |
//!   +-----------+      +-------------+      +-----------+
//! ```
//!
//! The engine is synchronous and single-threaded; callers serialize access
//! across handles. There is no crash-safe journalling: within a mutation
//! the header is written last, but an interrupted write sequence may leave
//! the file inconsistent.

pub mod codec;
pub mod file;
pub mod index;
pub mod layout;
pub mod record;
mod registry;
pub mod store;

pub use kardex_common::{Result, StoreError, StoreOptions};
pub use record::{Record, SearchKey, SlotId};
pub use store::Store;
