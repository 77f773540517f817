//! `MTConnectStreams` (current / sample) documents

use chrono::{DateTime, Utc};
use mtc_core::{Category, ConditionState};
use roxmltree::Node;

use super::{
    attr, child, element_children, header_of, parse_error, parse_root, parse_timestamp,
    required_attr, Header,
};
use crate::error::Result;

/// Response to a `current` or `sample` request
#[derive(Debug, Clone)]
pub struct StreamsDocument {
    pub header: Header,
    pub device_streams: Vec<DeviceStream>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStream {
    pub name: String,
    pub uuid: Option<String>,
    pub observations: Vec<Observation>,
}

/// One reported value of a data item
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub data_item_id: String,
    pub category: Category,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    /// Element text, e.g. `ACTIVE` or `1200.5`
    pub value: String,
    /// Set for CONDITION observations only
    pub condition: Option<ConditionState>,
    pub name: Option<String>,
}

impl StreamsDocument {
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = parse_root(xml, "MTConnectStreams")?;
        let root = doc.root_element();
        let header = header_of(root)?;

        let device_streams = match child(root, "Streams") {
            Some(streams) => element_children(streams)
                .filter(|n| n.tag_name().name() == "DeviceStream")
                .map(DeviceStream::parse)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            header,
            device_streams,
        })
    }

    /// Stream of one device, or the first stream when no name is given
    pub fn stream_for(&self, device_name: Option<&str>) -> Option<&DeviceStream> {
        match device_name {
            Some(name) => self.device_streams.iter().find(|s| s.name == name),
            None => self.device_streams.first(),
        }
    }
}

impl DeviceStream {
    fn parse(node: Node<'_, '_>) -> Result<Self> {
        let mut observations = Vec::new();

        for component_stream in element_children(node)
            .filter(|n| n.tag_name().name() == "ComponentStream")
        {
            for container in element_children(component_stream) {
                let category = match container.tag_name().name() {
                    "Samples" => Category::Sample,
                    "Events" => Category::Event,
                    "Condition" => Category::Condition,
                    _ => continue,
                };
                for observation in element_children(container) {
                    observations.push(Observation::parse(observation, category)?);
                }
            }
        }

        Ok(Self {
            name: required_attr(node, "name")?.to_string(),
            uuid: attr(node, "uuid"),
            observations,
        })
    }

    /// Latest observation of a data item in this stream
    pub fn latest(&self, data_item_id: &str) -> Option<&Observation> {
        self.observations
            .iter()
            .filter(|o| o.data_item_id == data_item_id)
            .max_by_key(|o| o.sequence)
    }
}

impl Observation {
    fn parse(node: Node<'_, '_>, category: Category) -> Result<Self> {
        let timestamp = required_attr(node, "timestamp")?;
        let sequence = required_attr(node, "sequence")?;

        let condition = match category {
            Category::Condition => Some(
                node.tag_name()
                    .name()
                    .parse::<ConditionState>()
                    .map_err(parse_error)?,
            ),
            _ => None,
        };

        Ok(Self {
            data_item_id: required_attr(node, "dataItemId")?.to_string(),
            category,
            timestamp: parse_timestamp(timestamp)
                .ok_or_else(|| parse_error(format!("bad timestamp '{}'", timestamp)))?,
            sequence: sequence
                .parse()
                .map_err(|_| parse_error(format!("bad sequence '{}'", sequence)))?,
            value: node.text().map(str::trim).unwrap_or_default().to_string(),
            condition,
            name: attr(node, "name"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MTConnectStreams xmlns="urn:mtconnect.org:MTConnectStreams:1.3">
  <Header creationTime="2017-03-01T12:00:10Z" sender="agent01" instanceId="1488369600" version="1.3.0.17" bufferSize="131072" nextSequence="42" firstSequence="1" lastSequence="41"/>
  <Streams>
    <DeviceStream name="VMC-3Axis" uuid="000">
      <ComponentStream component="Device" name="VMC-3Axis" componentId="d1">
        <Events>
          <Availability dataItemId="avail" timestamp="2017-03-01T12:00:01Z" sequence="5">AVAILABLE</Availability>
        </Events>
      </ComponentStream>
      <ComponentStream component="Controller" name="controller" componentId="c1">
        <Condition>
          <Fault dataItemId="logic" timestamp="2017-03-01T12:00:02Z" sequence="7" type="LOGIC_PROGRAM" nativeCode="1001">Emergency stop</Fault>
        </Condition>
      </ComponentStream>
      <ComponentStream component="Path" name="path" componentId="p1">
        <Samples>
          <SpindleSpeed dataItemId="Sspeed" timestamp="2017-03-01T12:00:03Z" sequence="9" subType="ACTUAL">1200.5</SpindleSpeed>
          <SpindleSpeed dataItemId="Sspeed" timestamp="2017-03-01T12:00:04Z" sequence="11" subType="ACTUAL">1250</SpindleSpeed>
        </Samples>
        <Events>
          <Execution dataItemId="exec" timestamp="2017-03-01T12:00:03Z" sequence="10">ACTIVE</Execution>
        </Events>
      </ComponentStream>
    </DeviceStream>
  </Streams>
</MTConnectStreams>"#;

    #[test]
    fn test_parse_current() {
        let doc = StreamsDocument::parse(CURRENT).unwrap();
        assert_eq!(doc.header.next_sequence, Some(42));

        let stream = doc.stream_for(Some("VMC-3Axis")).unwrap();
        assert_eq!(stream.observations.len(), 5);

        let avail = stream.latest("avail").unwrap();
        assert_eq!(avail.category, Category::Event);
        assert_eq!(avail.value, "AVAILABLE");

        let logic = stream.latest("logic").unwrap();
        assert_eq!(logic.condition, Some(ConditionState::Fault));
        assert_eq!(logic.value, "Emergency stop");

        assert_eq!(stream.latest("Sspeed").unwrap().value, "1250");
    }

    #[test]
    fn test_stream_for_unknown_device() {
        let doc = StreamsDocument::parse(CURRENT).unwrap();
        assert!(doc.stream_for(Some("Lathe")).is_none());
        assert!(doc.stream_for(None).is_some());
    }

    #[test]
    fn test_bad_sequence_is_parse_error() {
        let xml = CURRENT.replace("sequence=\"5\"", "sequence=\"five\"");
        assert!(StreamsDocument::parse(&xml).is_err());
    }
}
