//! Query event status variables.
//!
//! A query event carries a block of `(code, value)` pairs whose value
//! width is implied by the code. Each variant decodes exactly that width.

use serde::Serialize;

use super::io::{BinlogReader, BinlogWriter};
use crate::{Error, Result};

/// `Q_UPDATED_DB_NAMES` count meaning "too many databases to list".
pub const OVER_MAX_DBS_IN_EVENT_MTS: u8 = 254;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusVariable {
    Flags2(u32),
    SqlMode(u64),
    /// Pre-5.0.4 catalog, stored with a trailing NUL
    Catalog(String),
    AutoIncrement { increment: u16, offset: u16 },
    Charset { client: u16, connection: u16, server: u16 },
    TimeZone(String),
    CatalogNz(String),
    LcTimeNames(u16),
    CharsetDatabase(u16),
    TableMapForUpdate(u64),
    MasterDataWritten(u32),
    Invoker { user: String, host: String },
    /// `None` when the server only recorded that too many databases changed
    UpdatedDbNames(Option<Vec<String>>),
    Microseconds(u32),
    ExplicitDefaultsForTimestamp(u8),
    DdlLoggedWithXid(u64),
    DefaultCollationForUtf8mb4(u16),
    SqlRequirePrimaryKey(u8),
    DefaultTableEncryption(u8),
}

impl StatusVariable {
    pub const FLAGS2: u8 = 0;
    pub const SQL_MODE: u8 = 1;
    pub const CATALOG: u8 = 2;
    pub const AUTO_INCREMENT: u8 = 3;
    pub const CHARSET: u8 = 4;
    pub const TIME_ZONE: u8 = 5;
    pub const CATALOG_NZ: u8 = 6;
    pub const LC_TIME_NAMES: u8 = 7;
    pub const CHARSET_DATABASE: u8 = 8;
    pub const TABLE_MAP_FOR_UPDATE: u8 = 9;
    pub const MASTER_DATA_WRITTEN: u8 = 10;
    pub const INVOKER: u8 = 11;
    pub const UPDATED_DB_NAMES: u8 = 12;
    pub const MICROSECONDS: u8 = 13;
    pub const EXPLICIT_DEFAULTS_FOR_TIMESTAMP: u8 = 16;
    pub const DDL_LOGGED_WITH_XID: u8 = 17;
    pub const DEFAULT_COLLATION_FOR_UTF8MB4: u8 = 18;
    pub const SQL_REQUIRE_PRIMARY_KEY: u8 = 19;
    pub const DEFAULT_TABLE_ENCRYPTION: u8 = 20;

    pub fn code(&self) -> u8 {
        match self {
            StatusVariable::Flags2(_) => Self::FLAGS2,
            StatusVariable::SqlMode(_) => Self::SQL_MODE,
            StatusVariable::Catalog(_) => Self::CATALOG,
            StatusVariable::AutoIncrement { .. } => Self::AUTO_INCREMENT,
            StatusVariable::Charset { .. } => Self::CHARSET,
            StatusVariable::TimeZone(_) => Self::TIME_ZONE,
            StatusVariable::CatalogNz(_) => Self::CATALOG_NZ,
            StatusVariable::LcTimeNames(_) => Self::LC_TIME_NAMES,
            StatusVariable::CharsetDatabase(_) => Self::CHARSET_DATABASE,
            StatusVariable::TableMapForUpdate(_) => Self::TABLE_MAP_FOR_UPDATE,
            StatusVariable::MasterDataWritten(_) => Self::MASTER_DATA_WRITTEN,
            StatusVariable::Invoker { .. } => Self::INVOKER,
            StatusVariable::UpdatedDbNames(_) => Self::UPDATED_DB_NAMES,
            StatusVariable::Microseconds(_) => Self::MICROSECONDS,
            StatusVariable::ExplicitDefaultsForTimestamp(_) => Self::EXPLICIT_DEFAULTS_FOR_TIMESTAMP,
            StatusVariable::DdlLoggedWithXid(_) => Self::DDL_LOGGED_WITH_XID,
            StatusVariable::DefaultCollationForUtf8mb4(_) => Self::DEFAULT_COLLATION_FOR_UTF8MB4,
            StatusVariable::SqlRequirePrimaryKey(_) => Self::SQL_REQUIRE_PRIMARY_KEY,
            StatusVariable::DefaultTableEncryption(_) => Self::DEFAULT_TABLE_ENCRYPTION,
        }
    }

    /// Decodes the value for `code`; the code byte is already consumed.
    pub fn decode(code: u8, r: &mut BinlogReader<'_>) -> Result<Self> {
        let var = match code {
            Self::FLAGS2 => StatusVariable::Flags2(r.read_u32()?),
            Self::SQL_MODE => StatusVariable::SqlMode(r.read_u64()?),
            Self::CATALOG => {
                let catalog = r.read_u8_string()?;
                if r.read_u8()? != 0 {
                    return Err(Error::InvalidMessage {
                        message: "Catalog status variable missing NUL terminator".to_string(),
                    });
                }
                StatusVariable::Catalog(catalog)
            }
            Self::AUTO_INCREMENT => StatusVariable::AutoIncrement {
                increment: r.read_u16()?,
                offset: r.read_u16()?,
            },
            Self::CHARSET => StatusVariable::Charset {
                client: r.read_u16()?,
                connection: r.read_u16()?,
                server: r.read_u16()?,
            },
            Self::TIME_ZONE => StatusVariable::TimeZone(r.read_u8_string()?),
            Self::CATALOG_NZ => StatusVariable::CatalogNz(r.read_u8_string()?),
            Self::LC_TIME_NAMES => StatusVariable::LcTimeNames(r.read_u16()?),
            Self::CHARSET_DATABASE => StatusVariable::CharsetDatabase(r.read_u16()?),
            Self::TABLE_MAP_FOR_UPDATE => StatusVariable::TableMapForUpdate(r.read_u64()?),
            Self::MASTER_DATA_WRITTEN => StatusVariable::MasterDataWritten(r.read_u32()?),
            Self::INVOKER => StatusVariable::Invoker {
                user: r.read_u8_string()?,
                host: r.read_u8_string()?,
            },
            Self::UPDATED_DB_NAMES => {
                let count = r.read_u8()?;
                if count == OVER_MAX_DBS_IN_EVENT_MTS {
                    StatusVariable::UpdatedDbNames(None)
                } else {
                    let mut names = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        names.push(r.read_nul_string()?);
                    }
                    StatusVariable::UpdatedDbNames(Some(names))
                }
            }
            Self::MICROSECONDS => StatusVariable::Microseconds(r.read_int(3)? as u32),
            Self::EXPLICIT_DEFAULTS_FOR_TIMESTAMP => {
                StatusVariable::ExplicitDefaultsForTimestamp(r.read_u8()?)
            }
            Self::DDL_LOGGED_WITH_XID => StatusVariable::DdlLoggedWithXid(r.read_u64()?),
            Self::DEFAULT_COLLATION_FOR_UTF8MB4 => {
                StatusVariable::DefaultCollationForUtf8mb4(r.read_u16()?)
            }
            Self::SQL_REQUIRE_PRIMARY_KEY => StatusVariable::SqlRequirePrimaryKey(r.read_u8()?),
            Self::DEFAULT_TABLE_ENCRYPTION => StatusVariable::DefaultTableEncryption(r.read_u8()?),
            other => return Err(Error::UnknownStatusVariable(other)),
        };
        Ok(var)
    }

    /// Writes the code byte followed by the value.
    pub fn encode(&self, w: &mut BinlogWriter) -> Result<()> {
        w.write_u8(self.code());
        match self {
            StatusVariable::Flags2(v) => w.write_u32(*v),
            StatusVariable::SqlMode(v) => w.write_u64(*v),
            StatusVariable::Catalog(s) => {
                w.write_u8_string(s)?;
                w.write_u8(0);
            }
            StatusVariable::AutoIncrement { increment, offset } => {
                w.write_u16(*increment);
                w.write_u16(*offset);
            }
            StatusVariable::Charset {
                client,
                connection,
                server,
            } => {
                w.write_u16(*client);
                w.write_u16(*connection);
                w.write_u16(*server);
            }
            StatusVariable::TimeZone(s) | StatusVariable::CatalogNz(s) => w.write_u8_string(s)?,
            StatusVariable::LcTimeNames(v)
            | StatusVariable::CharsetDatabase(v)
            | StatusVariable::DefaultCollationForUtf8mb4(v) => w.write_u16(*v),
            StatusVariable::TableMapForUpdate(v) | StatusVariable::DdlLoggedWithXid(v) => {
                w.write_u64(*v)
            }
            StatusVariable::MasterDataWritten(v) => w.write_u32(*v),
            StatusVariable::Invoker { user, host } => {
                w.write_u8_string(user)?;
                w.write_u8_string(host)?;
            }
            StatusVariable::UpdatedDbNames(None) => w.write_u8(OVER_MAX_DBS_IN_EVENT_MTS),
            StatusVariable::UpdatedDbNames(Some(names)) => {
                // The count byte 254 is reserved for the overflow marker
                if names.len() >= OVER_MAX_DBS_IN_EVENT_MTS as usize {
                    return Err(Error::InvalidMessage {
                        message: format!("{} updated database names do not fit", names.len()),
                    });
                }
                w.write_u8(names.len() as u8);
                for name in names {
                    w.write_nul_string(name);
                }
            }
            StatusVariable::Microseconds(v) => w.write_int(*v as u64, 3),
            StatusVariable::ExplicitDefaultsForTimestamp(v)
            | StatusVariable::SqlRequirePrimaryKey(v)
            | StatusVariable::DefaultTableEncryption(v) => w.write_u8(*v),
        }
        Ok(())
    }

    /// Decodes a whole status block; the block must be consumed exactly.
    pub fn decode_block(block: &[u8]) -> Result<Vec<StatusVariable>> {
        let mut r = BinlogReader::new(block);
        let mut vars = Vec::new();
        while !r.is_empty() {
            let code = r.read_u8()?;
            vars.push(StatusVariable::decode(code, &mut r)?);
        }
        Ok(vars)
    }

    pub fn encode_block(vars: &[StatusVariable]) -> Result<Vec<u8>> {
        let mut w = BinlogWriter::new();
        for var in vars {
            var.encode(&mut w)?;
        }
        Ok(w.into_vec())
    }
}
