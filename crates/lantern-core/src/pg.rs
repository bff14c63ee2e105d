//! Production connection manager over the synchronous `postgres` driver.

use crate::config::PoolConfig;
use crate::error::{LanternError, Result};
use crate::params::Param;
use crate::pool::{Cell, Connection, ManageConnection, Row};
use postgres::types::{ToSql, Type};
use postgres::{Client, Config, NoTls};
use serde_json::Value;
use std::io::Write;
use std::time::Duration;
use tracing::debug;

pub struct PgManager {
    config: Config,
    statement_timeout: Option<Duration>,
}

impl PgManager {
    pub fn new(pool_config: &PoolConfig) -> Result<Self> {
        let config = pool_config
            .url
            .parse::<Config>()
            .map_err(|e| LanternError::Configuration(format!("invalid database url: {e}")))?;
        Ok(Self {
            config,
            statement_timeout: pool_config.statement_timeout,
        })
    }
}

impl ManageConnection for PgManager {
    fn connect(&self) -> Result<Box<dyn Connection>> {
        let mut client = self.config.connect(NoTls)?;
        if let Some(timeout) = self.statement_timeout {
            client.batch_execute(&format!(
                "SET statement_timeout = {}",
                timeout.as_millis()
            ))?;
        }
        debug!("opened backend connection");
        Ok(Box::new(PgConnection { client }))
    }
}

pub struct PgConnection {
    client: Client,
}

fn bind(param: &Param) -> &(dyn ToSql + Sync) {
    match param {
        Param::Text(v) => v,
        Param::Int(v) => v,
        Param::OptionalInt(v) => v,
        Param::Float(v) => v,
        Param::Json(v) => v,
        Param::Vector(v) => v,
        Param::TextArray(v) => v,
        Param::IntArray(v) => v,
        Param::FloatArray(v) => v,
    }
}

fn decode_cell(row: &postgres::Row, idx: usize, ty: &Type) -> Result<Cell> {
    let cell = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Cell::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| Cell::Int(v.into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| Cell::Int(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Cell::Int),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| Cell::Float(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Cell::Float),
        Type::TEXT | Type::VARCHAR | Type::NAME | Type::BPCHAR => {
            row.try_get::<_, Option<String>>(idx)?.map(Cell::Text)
        }
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx)?.map(Cell::Json),
        Type::FLOAT4_ARRAY => row.try_get::<_, Option<Vec<f32>>>(idx)?.map(Cell::Vector),
        ref other => {
            let column = row.columns()[idx].name();
            return Err(LanternError::decode(
                column,
                format!("unsupported column type {other}"),
            ));
        }
    };
    Ok(cell.unwrap_or(Cell::Null))
}

fn decode_row(row: &postgres::Row) -> Result<Row> {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let cells = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| decode_cell(row, idx, column.type_()))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(columns, cells))
}

impl Connection for PgConnection {
    fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64> {
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(bind).collect();
        Ok(self.client.execute(sql, &refs)?)
    }

    fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Row>> {
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(bind).collect();
        self.client.query(sql, &refs)?.iter().map(decode_row).collect()
    }

    fn batch_execute(&mut self, sql: &str) -> Result<()> {
        Ok(self.client.batch_execute(sql)?)
    }

    fn copy_in(&mut self, sql: &str, data: &[u8]) -> Result<u64> {
        let mut writer = self.client.copy_in(sql)?;
        writer.write_all(data)?;
        Ok(writer.finish()?)
    }

    fn is_broken(&self) -> bool {
        self.client.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_urls() {
        let err = PgManager::new(&PoolConfig::new("postgres://host:notaport/db"))
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn accepts_key_value_and_url_forms() {
        assert!(PgManager::new(&PoolConfig::new("postgres://u:p@localhost:5432/db")).is_ok());
        assert!(PgManager::new(&PoolConfig::new("host=localhost user=postgres")).is_ok());
    }
}
