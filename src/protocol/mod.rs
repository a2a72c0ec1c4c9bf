//! External Protocol Interface boundary: ADP/AECP/ACMP/MVU framing
//! and transmission are out of scope; this module defines
//! only the trait and event vocabulary the core drives and consumes.

pub mod interface;
pub mod status;

pub use interface::{
  AcmpCommand, AdpEntityInfo, AdpEvent, AecpCommand, MemoryChunk, MemoryObjectOperation,
  MvuCommand, NameTarget, ProtocolEventSink, ProtocolInterface, SequenceID, SniffedAcmpEvent,
  UnsolicitedNotification,
};
pub use status::{AcmpStatus, AemAecpStatus, ClassifiableStatus, MvuStatus};
