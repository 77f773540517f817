//! `MTConnectDevices` (probe) documents

use mtc_core::Category;
use roxmltree::Node;

use super::{
    attr, child, element_children, header_of, parse_error, parse_root, required_attr, Header,
};
use crate::error::Result;

/// Response to a `probe` request
#[derive(Debug, Clone)]
pub struct DevicesDocument {
    pub header: Header,
    pub devices: Vec<DeviceElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceElement {
    pub id: String,
    pub name: String,
    pub uuid: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub station: Option<String>,
    pub description: Option<String>,
    pub iso841_class: Option<String>,
    pub sample_interval: Option<f64>,
    pub data_items: Vec<DataItemElement>,
    pub components: Vec<ComponentElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentElement {
    pub id: String,
    /// Element name, e.g. `Controller`
    pub type_name: String,
    pub name: Option<String>,
    pub uuid: Option<String>,
    pub native_name: Option<String>,
    pub data_items: Vec<DataItemElement>,
    pub components: Vec<ComponentElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataItemElement {
    pub id: String,
    pub name: Option<String>,
    pub category: Category,
    pub type_name: String,
    pub sub_type: Option<String>,
    pub units: Option<String>,
    pub native_units: Option<String>,
    pub representation: Option<String>,
}

impl DevicesDocument {
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = parse_root(xml, "MTConnectDevices")?;
        let root = doc.root_element();
        let header = header_of(root)?;

        let devices = match child(root, "Devices") {
            Some(devices) => element_children(devices)
                .filter(|n| n.tag_name().name() == "Device")
                .map(DeviceElement::parse)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self { header, devices })
    }

    /// Names of every device in the document
    pub fn device_names(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.name.clone()).collect()
    }
}

impl DeviceElement {
    fn parse(node: Node<'_, '_>) -> Result<Self> {
        let description = child(node, "Description");
        let desc_attr = |name: &str| description.and_then(|d| attr(d, name));

        Ok(Self {
            id: required_attr(node, "id")?.to_string(),
            name: required_attr(node, "name")?.to_string(),
            uuid: attr(node, "uuid"),
            manufacturer: desc_attr("manufacturer"),
            model: desc_attr("model"),
            serial_number: desc_attr("serialNumber"),
            station: desc_attr("station"),
            description: description
                .and_then(|d| d.text())
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            iso841_class: attr(node, "iso841Class"),
            sample_interval: node
                .attribute("sampleInterval")
                .or_else(|| node.attribute("sampleRate"))
                .and_then(|v| v.parse().ok()),
            data_items: parse_data_items(node)?,
            components: parse_components(node)?,
        })
    }

    /// Every component below the device, depth first, with the id and
    /// whether the parent is the device itself
    pub fn all_components(&self) -> Vec<(&ComponentElement, &str, bool)> {
        fn walk<'a>(
            components: &'a [ComponentElement],
            parent_id: &'a str,
            parent_is_device: bool,
            out: &mut Vec<(&'a ComponentElement, &'a str, bool)>,
        ) {
            for component in components {
                out.push((component, parent_id, parent_is_device));
                walk(&component.components, &component.id, false, out);
            }
        }

        let mut out = Vec::new();
        walk(&self.components, &self.id, true, &mut out);
        out
    }
}

impl ComponentElement {
    fn parse(node: Node<'_, '_>) -> Result<Self> {
        Ok(Self {
            id: required_attr(node, "id")?.to_string(),
            type_name: node.tag_name().name().to_string(),
            name: attr(node, "name"),
            uuid: attr(node, "uuid"),
            native_name: attr(node, "nativeName"),
            data_items: parse_data_items(node)?,
            components: parse_components(node)?,
        })
    }
}

impl DataItemElement {
    fn parse(node: Node<'_, '_>) -> Result<Self> {
        let category = required_attr(node, "category")?
            .parse::<Category>()
            .map_err(parse_error)?;

        Ok(Self {
            id: required_attr(node, "id")?.to_string(),
            name: attr(node, "name"),
            category,
            type_name: required_attr(node, "type")?.to_string(),
            sub_type: attr(node, "subType"),
            units: attr(node, "units"),
            native_units: attr(node, "nativeUnits"),
            representation: attr(node, "representation"),
        })
    }
}

fn parse_data_items(node: Node<'_, '_>) -> Result<Vec<DataItemElement>> {
    match child(node, "DataItems") {
        Some(items) => element_children(items)
            .filter(|n| n.tag_name().name() == "DataItem")
            .map(DataItemElement::parse)
            .collect(),
        None => Ok(Vec::new()),
    }
}

fn parse_components(node: Node<'_, '_>) -> Result<Vec<ComponentElement>> {
    match child(node, "Components") {
        Some(components) => element_children(components)
            .map(ComponentElement::parse)
            .collect(),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const PROBE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MTConnectDevices xmlns="urn:mtconnect.org:MTConnectDevices:1.3">
  <Header creationTime="2017-03-01T12:00:00Z" sender="agent01" instanceId="1488369600" version="1.3.0.17" assetBufferSize="1024" assetCount="0" bufferSize="131072"/>
  <Devices>
    <Device id="d1" name="VMC-3Axis" uuid="000">
      <Description manufacturer="Haas" model="VF-2" serialNumber="123">Vertical mill</Description>
      <DataItems>
        <DataItem category="EVENT" id="avail" type="AVAILABILITY"/>
      </DataItems>
      <Components>
        <Controller id="c1" name="controller">
          <DataItems>
            <DataItem category="CONDITION" id="logic" type="LOGIC_PROGRAM"/>
          </DataItems>
          <Components>
            <Path id="p1" name="path">
              <DataItems>
                <DataItem category="EVENT" id="exec" type="EXECUTION"/>
                <DataItem category="SAMPLE" id="Sspeed" type="SPINDLE_SPEED" subType="ACTUAL" units="REVOLUTION/MINUTE"/>
              </DataItems>
            </Path>
          </Components>
        </Controller>
      </Components>
    </Device>
  </Devices>
</MTConnectDevices>"#;

    #[test]
    fn test_parse_probe() {
        let doc = DevicesDocument::parse(PROBE).unwrap();
        assert_eq!(doc.header.instance_id, 1488369600);
        assert_eq!(doc.header.version, "1.3.0.17");
        assert_eq!(doc.device_names(), vec!["VMC-3Axis".to_string()]);

        let device = &doc.devices[0];
        assert_eq!(device.manufacturer.as_deref(), Some("Haas"));
        assert_eq!(device.description.as_deref(), Some("Vertical mill"));
        assert_eq!(device.data_items[0].type_name, "AVAILABILITY");

        let controller = &device.components[0];
        assert_eq!(controller.type_name, "Controller");
        assert_eq!(controller.data_items[0].category, Category::Condition);

        let path = &controller.components[0];
        assert_eq!(path.data_items[1].sub_type.as_deref(), Some("ACTUAL"));
    }

    #[test]
    fn test_all_components_tracks_parents() {
        let doc = DevicesDocument::parse(PROBE).unwrap();
        let flat: Vec<(String, String, bool)> = doc.devices[0]
            .all_components()
            .into_iter()
            .map(|(c, parent, is_device)| (c.id.clone(), parent.to_string(), is_device))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("c1".to_string(), "d1".to_string(), true),
                ("p1".to_string(), "c1".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_missing_header_is_error() {
        let xml = r#"<MTConnectDevices><Devices/></MTConnectDevices>"#;
        assert!(DevicesDocument::parse(xml).is_err());
    }
}
