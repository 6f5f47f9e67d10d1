pub mod decoder;
pub mod event;
pub mod extractor;
pub mod header;
pub mod io;
pub mod packet;
pub mod rows;
pub mod status;

#[cfg(test)]
mod decoder_tests;
#[cfg(test)]
pub mod test_utils;

pub use decoder::{encode_event, BinlogDecoder, DecodedEvent, EventFramer, BINLOG_MAGIC};
pub use event::BinlogEvent;
pub use extractor::{BinlogExtractor, BinlogPosition, ExtractStats, StreamFormat};
pub use header::{EventHeader, EventType};
pub use packet::{BinlogPacket, Packet, PacketFramer, ResultSetRowPacket};
pub use rows::{ColumnType, ColumnValue, RowsEvent, TableMapEvent};
pub use status::StatusVariable;
