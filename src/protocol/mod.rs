//! R2000 wire protocol.
//!
//! - [`command`]: HTTP command interface (`GET /cmd/<name>?…`, JSON replies).
//! - [`packet`]: binary scan data packets received on a TCP handle.

pub mod command;
pub mod packet;

pub use command::{CommandClient, CommandResponse, HandleInfo};
pub use packet::{Packet, PacketFramer, PacketHeader, ScanAssembler};
