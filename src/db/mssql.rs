//! SQL Server connections over tiberius
//!
//! tiberius is async; the engine is not. Each connection shares a tokio
//! runtime with the interrupt listener and drives its futures with `block_on`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::TryStreamExt;
use tiberius::{AuthMethod, Client, ColumnData, ColumnType, Config, QueryItem, SqlBrowser};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, trace};

use super::{
    BufferedRows, Column, ColumnKind, ConnectTarget, Connector, Database, DbError, Row, Rows,
    ServerError, Value,
};

type MssqlClient = Client<Compat<TcpStream>>;

impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        match err {
            tiberius::error::Error::Server(token) => DbError::Server(ServerError {
                number: token.code(),
                class: token.class(),
                state: token.state(),
                server: token.server().to_string(),
                procedure: token.procedure().to_string(),
                line: token.line(),
                message: token.message().to_string(),
            }),
            other => DbError::Driver {
                message: other.to_string(),
            },
        }
    }
}

/// Opens tiberius connections on a shared runtime
pub struct MssqlConnector {
    runtime: Arc<Runtime>,
}

impl MssqlConnector {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }
}

impl Connector for MssqlConnector {
    fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Database>, DbError> {
        if target.trusted {
            return Err(DbError::IntegratedAuthUnsupported);
        }
        let config = build_config(target);
        let server = target.display_name();
        debug!("Connecting to {} as {}", server, target.user);

        let connect = connect_client(config, !target.instance.is_empty());
        let client = self.runtime.block_on(async {
            match target.login_timeout {
                Some(limit) => tokio::time::timeout(limit, connect)
                    .await
                    .map_err(|_| DbError::LoginTimeout {
                        server: server.clone(),
                    })?,
                None => connect.await,
            }
        });
        let client = client.map_err(|err| match err {
            DbError::Server(_) | DbError::LoginTimeout { .. } => err,
            other => DbError::Connection {
                server: server.clone(),
                message: other.to_string(),
            },
        })?;

        Ok(Box::new(MssqlDatabase {
            runtime: Arc::clone(&self.runtime),
            client,
        }))
    }
}

fn build_config(target: &ConnectTarget) -> Config {
    let mut config = Config::new();
    let host = match target.host.as_str() {
        "" | "." | "(local)" => "localhost",
        host => host,
    };
    config.host(host);
    if target.port > 0 {
        config.port(target.port);
    }
    if !target.instance.is_empty() {
        config.instance_name(&target.instance);
    }
    if !target.database.is_empty() {
        config.database(&target.database);
    }
    if !target.application_name.is_empty() {
        config.application_name(&target.application_name);
    }
    config.authentication(AuthMethod::sql_server(&target.user, &target.password));
    if target.trust_server_certificate {
        config.trust_cert();
    }
    trace!(
        "Packet size {} and workstation '{}' use driver defaults",
        target.packet_size,
        target.workstation
    );
    config
}

async fn connect_client(config: Config, named_instance: bool) -> Result<MssqlClient, DbError> {
    let tcp = if named_instance {
        TcpStream::connect_named(&config).await?
    } else {
        TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| DbError::Driver {
                message: e.to_string(),
            })?
    };
    tcp.set_nodelay(true).map_err(|e| DbError::Driver {
        message: e.to_string(),
    })?;

    let fallback = config.clone();
    match Client::connect(config, tcp.compat_write()).await {
        Ok(client) => Ok(client),
        Err(tiberius::error::Error::Routing { host, port }) => {
            debug!("Server redirected the connection to {}:{}", host, port);
            let mut config = fallback;
            config.host(&host);
            config.port(port);
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| DbError::Driver {
                    message: e.to_string(),
                })?;
            tcp.set_nodelay(true).map_err(|e| DbError::Driver {
                message: e.to_string(),
            })?;
            Ok(Client::connect(config, tcp.compat_write()).await?)
        }
        Err(err) => Err(err.into()),
    }
}

/// An open SQL Server connection
pub struct MssqlDatabase {
    runtime: Arc<Runtime>,
    client: MssqlClient,
}

impl Database for MssqlDatabase {
    fn query(&mut self, text: &str, timeout: Option<Duration>) -> Result<Box<dyn Rows>, DbError> {
        let MssqlDatabase { runtime, client } = self;
        let rows = runtime.block_on(async {
            let collect = collect_results(client, text);
            match timeout {
                Some(limit) => tokio::time::timeout(limit, collect)
                    .await
                    .map_err(|_| DbError::QueryTimeout)?,
                None => collect.await,
            }
        })?;
        Ok(Box::new(rows))
    }
}

/// Drain the whole response of a batch into memory.
///
/// A statement error is attached after the result set it follows and the
/// stream is polled again, so result sets the server sends afterwards are
/// still delivered. Two errors in a row end the batch.
async fn collect_results(client: &mut MssqlClient, text: &str) -> Result<BufferedRows, DbError> {
    let mut stream = client.simple_query(text).await?;
    let mut rows = BufferedRows::new();
    let mut open_set = false;
    let mut after_error = false;
    loop {
        match stream.try_next().await {
            Ok(Some(QueryItem::Metadata(meta))) => {
                if open_set {
                    rows_affected(&mut rows);
                }
                rows.push_result_set(meta.columns().iter().map(convert_column).collect());
                open_set = true;
                after_error = false;
            }
            Ok(Some(QueryItem::Row(row))) => {
                rows.push_row(convert_row(&row));
                after_error = false;
            }
            Ok(None) => break,
            Err(err) => {
                if open_set {
                    rows_affected(&mut rows);
                    open_set = false;
                }
                if after_error {
                    rows.push_error(err.into());
                    break;
                }
                trace!("Statement failed, reading on: {}", err);
                rows.push_set_error(err.into());
                after_error = true;
            }
        }
    }
    if open_set {
        rows_affected(&mut rows);
    }
    Ok(rows)
}

fn rows_affected(rows: &mut BufferedRows) {
    let count = rows.last_set_len();
    let noun = if count == 1 { "row" } else { "rows" };
    rows.push_message(format!("({} {} affected)", count, noun));
}

fn convert_column(column: &tiberius::Column) -> Column {
    let kind = match column.column_type() {
        ColumnType::Bit | ColumnType::Bitn => ColumnKind::Bit,
        ColumnType::Int1 => ColumnKind::TinyInt,
        ColumnType::Int2 => ColumnKind::SmallInt,
        ColumnType::Int4 => ColumnKind::Int,
        ColumnType::Int8 => ColumnKind::BigInt,
        ColumnType::Intn => ColumnKind::BigInt,
        ColumnType::Float4 => ColumnKind::Real,
        ColumnType::Float8 | ColumnType::Floatn => ColumnKind::Float,
        ColumnType::Money4 => ColumnKind::SmallMoney,
        ColumnType::Money => ColumnKind::Money,
        ColumnType::Decimaln | ColumnType::Numericn => ColumnKind::Decimal,
        ColumnType::Daten => ColumnKind::Date,
        ColumnType::Timen => ColumnKind::Time,
        ColumnType::Datetime4 => ColumnKind::SmallDateTime,
        ColumnType::Datetime | ColumnType::Datetimen => ColumnKind::DateTime,
        ColumnType::Datetime2 => ColumnKind::DateTime2,
        ColumnType::DatetimeOffsetn => ColumnKind::DateTimeOffset,
        ColumnType::Guid => ColumnKind::UniqueIdentifier,
        ColumnType::BigChar => ColumnKind::Char,
        ColumnType::BigVarChar => ColumnKind::VarChar,
        ColumnType::NChar => ColumnKind::NChar,
        ColumnType::NVarchar => ColumnKind::NVarChar,
        ColumnType::Text => ColumnKind::Text,
        ColumnType::NText => ColumnKind::NText,
        ColumnType::BigBinary => ColumnKind::Binary,
        ColumnType::BigVarBin => ColumnKind::VarBinary,
        ColumnType::Image => ColumnKind::Image,
        ColumnType::Xml => ColumnKind::Xml,
        ColumnType::SSVariant => ColumnKind::Variant,
        _ => ColumnKind::Other,
    };
    Column::new(column.name(), kind)
}

fn convert_column_data(data: &ColumnData<'_>) -> Value {
    match data {
        ColumnData::Bit(Some(b)) => Value::Bool(*b),
        ColumnData::U8(Some(v)) => Value::Int(*v as i64),
        ColumnData::I16(Some(v)) => Value::Int(*v as i64),
        ColumnData::I32(Some(v)) => Value::Int(*v as i64),
        ColumnData::I64(Some(v)) => Value::Int(*v),
        ColumnData::F32(Some(v)) => Value::Float(*v as f64),
        ColumnData::F64(Some(v)) => Value::Float(*v),
        ColumnData::Numeric(Some(n)) => Value::Text(format_decimal(n.value(), n.scale())),
        ColumnData::String(Some(s)) => Value::Text(s.to_string()),
        ColumnData::Guid(Some(g)) => Value::Text(g.to_string().to_uppercase()),
        ColumnData::Binary(Some(b)) => Value::Binary(b.to_vec()),
        ColumnData::Xml(Some(xml)) => Value::Text(xml.to_string()),
        _ => Value::Null,
    }
}

/// Date and time columns go through chrono for their text form.
fn convert_row(row: &tiberius::Row) -> Row {
    let values = row
        .cells()
        .enumerate()
        .map(|(i, (_col, data))| match data {
            ColumnData::DateTime(Some(_)) | ColumnData::SmallDateTime(Some(_)) => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .ok()
                .flatten()
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()))
                .unwrap_or(Value::Null),
            ColumnData::DateTime2(Some(_)) => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .ok()
                .flatten()
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.7f").to_string()))
                .unwrap_or(Value::Null),
            ColumnData::DateTimeOffset(Some(_)) => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(i)
                .ok()
                .flatten()
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.7f %:z").to_string()))
                .unwrap_or(Value::Null),
            ColumnData::Date(Some(_)) => row
                .try_get::<chrono::NaiveDate, _>(i)
                .ok()
                .flatten()
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null),
            ColumnData::Time(Some(_)) => row
                .try_get::<chrono::NaiveTime, _>(i)
                .ok()
                .flatten()
                .map(|t| Value::Text(t.format("%H:%M:%S%.7f").to_string()))
                .unwrap_or(Value::Null),
            _ => convert_column_data(data),
        })
        .collect();
    Row::new(values)
}

/// Exact text of a scaled decimal
fn format_decimal(value: i128, scale: u8) -> String {
    let negative = value < 0;
    let digits = value.unsigned_abs().to_string();
    let scale = scale as usize;
    let text = if scale == 0 {
        digits
    } else if digits.len() > scale {
        let (int_part, frac_part) = digits.split_at(digits.len() - scale);
        format!("{}.{}", int_part, frac_part)
    } else {
        format!(".{}{}", "0".repeat(scale - digits.len()), digits)
    };
    if negative {
        format!("-{}", text)
    } else {
        text
    }
}
