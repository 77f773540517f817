//! Row <-> model mapping

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use mtc_core::{
    Agent, ComponentDefinition, Connection, DataItemDefinition, DeviceDefinition, ParentType,
    Sample,
};
use rusqlite::types::Type;
use rusqlite::Row;

pub(crate) fn to_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| conversion_error(idx, format!("timestamp {} out of range", ms)))
}

fn parsed<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: T::Err| conversion_error(idx, e.to_string()))
}

fn parsed_opt<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|e: T::Err| conversion_error(idx, e.to_string())))
        .transpose()
}

pub(crate) fn parent_type_str(parent_type: ParentType) -> &'static str {
    match parent_type {
        ParentType::Device => "device",
        ParentType::Component => "component",
    }
}

fn parent_type(row: &Row, idx: usize) -> rusqlite::Result<ParentType> {
    let text: String = row.get(idx)?;
    match text.as_str() {
        "device" => Ok(ParentType::Device),
        "component" => Ok(ParentType::Component),
        other => Err(conversion_error(idx, format!("unknown parent type '{}'", other))),
    }
}

pub(crate) const CONNECTION_COLUMNS: &str =
    "address, port, device_name, physical_address, enabled, interval_ms";

pub(crate) fn connection(row: &Row) -> rusqlite::Result<Connection> {
    let address: String = row.get(0)?;
    let port: u16 = row.get(1)?;
    let connection = Connection::new(address, port, row.get(2)?, row.get(3)?)
        .with_enabled(row.get(4)?)
        .with_interval_ms(row.get::<_, i64>(5)? as u64);
    Ok(connection)
}

pub(crate) const AGENT_COLUMNS: &str =
    "device_id, instance_id, sender, version, buffer_size, test_indicator, timestamp";

pub(crate) fn agent(row: &Row) -> rusqlite::Result<Agent> {
    Ok(Agent {
        device_id: parsed(row, 0)?,
        instance_id: row.get::<_, i64>(1)? as u64,
        sender: row.get(2)?,
        version: row.get(3)?,
        buffer_size: row.get::<_, i64>(4)? as u64,
        test_indicator: row.get(5)?,
        timestamp: timestamp(row, 6)?,
    })
}

pub(crate) const DEVICE_COLUMNS: &str = "device_id, agent_instance_id, id, name, uuid, \
     manufacturer, model, serial_number, station, description, iso841_class, sample_interval";

pub(crate) fn device(row: &Row) -> rusqlite::Result<DeviceDefinition> {
    Ok(DeviceDefinition {
        device_id: parsed(row, 0)?,
        agent_instance_id: row.get::<_, i64>(1)? as u64,
        id: row.get(2)?,
        name: row.get(3)?,
        uuid: row.get(4)?,
        manufacturer: row.get(5)?,
        model: row.get(6)?,
        serial_number: row.get(7)?,
        station: row.get(8)?,
        description: row.get(9)?,
        iso841_class: row.get(10)?,
        sample_interval: row.get(11)?,
    })
}

pub(crate) const COMPONENT_COLUMNS: &str =
    "device_id, agent_instance_id, id, type, name, uuid, native_name, parent_id, parent_type";

pub(crate) fn component(row: &Row) -> rusqlite::Result<ComponentDefinition> {
    Ok(ComponentDefinition {
        device_id: parsed(row, 0)?,
        agent_instance_id: row.get::<_, i64>(1)? as u64,
        id: row.get(2)?,
        type_name: row.get(3)?,
        name: row.get(4)?,
        uuid: row.get(5)?,
        native_name: row.get(6)?,
        parent_id: row.get(7)?,
        parent_type: parent_type(row, 8)?,
    })
}

pub(crate) const DATA_ITEM_COLUMNS: &str = "device_id, agent_instance_id, id, name, category, \
     type, sub_type, units, native_units, representation, parent_id, parent_type";

pub(crate) fn data_item(row: &Row) -> rusqlite::Result<DataItemDefinition> {
    Ok(DataItemDefinition {
        device_id: parsed(row, 0)?,
        agent_instance_id: row.get::<_, i64>(1)? as u64,
        id: row.get(2)?,
        name: row.get(3)?,
        category: parsed(row, 4)?,
        type_name: row.get(5)?,
        sub_type: row.get(6)?,
        units: row.get(7)?,
        native_units: row.get(8)?,
        representation: row.get(9)?,
        parent_id: row.get(10)?,
        parent_type: parent_type(row, 11)?,
    })
}

pub(crate) const SAMPLE_COLUMNS: &str =
    "device_id, id, agent_instance_id, sequence, timestamp, value, condition";

pub(crate) fn sample(row: &Row) -> rusqlite::Result<Sample> {
    Ok(Sample {
        device_id: parsed(row, 0)?,
        id: row.get(1)?,
        agent_instance_id: row.get::<_, i64>(2)? as u64,
        sequence: row.get::<_, i64>(3)? as u64,
        timestamp: timestamp(row, 4)?,
        value: row.get(5)?,
        condition: parsed_opt(row, 6)?,
    })
}
