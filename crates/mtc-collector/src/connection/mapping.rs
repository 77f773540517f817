//! Agent documents to telemetry events

use mtc_client::{
    AssetsDocument, DataItemElement, DeviceElement, DeviceStream, DevicesDocument, Header,
};
use mtc_core::{
    Agent, AssetDefinition, ComponentDefinition, DataItemDefinition, DeviceDefinition, DeviceId,
    ParentType, Sample, TelemetryEvent,
};

const AVAILABILITY: &str = "AVAILABILITY";

/// Device element of a probe: the named one, or the first
pub(crate) fn select_device<'a>(
    doc: &'a DevicesDocument,
    device_name: Option<&str>,
) -> Option<&'a DeviceElement> {
    match device_name {
        Some(name) => doc.devices.iter().find(|d| d.name == name),
        None => doc.devices.first(),
    }
}

pub(crate) fn agent(device_id: &DeviceId, header: &Header) -> Agent {
    Agent {
        device_id: device_id.clone(),
        instance_id: header.instance_id,
        sender: header.sender.clone(),
        version: header.version.clone(),
        buffer_size: header.buffer_size,
        test_indicator: header.test_indicator,
        timestamp: header.creation_time,
    }
}

/// Structural events of one probe, in delivery order:
/// agent, device, components, data items
pub(crate) fn structure(
    device_id: &DeviceId,
    header: &Header,
    device: &DeviceElement,
) -> Vec<TelemetryEvent> {
    let instance = header.instance_id;

    let definition = DeviceDefinition {
        device_id: device_id.clone(),
        agent_instance_id: instance,
        id: device.id.clone(),
        name: device.name.clone(),
        uuid: device.uuid.clone(),
        manufacturer: device.manufacturer.clone(),
        model: device.model.clone(),
        serial_number: device.serial_number.clone(),
        station: device.station.clone(),
        description: device.description.clone(),
        iso841_class: device.iso841_class.clone(),
        sample_interval: device.sample_interval,
    };

    let mut components = Vec::new();
    let mut data_items: Vec<DataItemDefinition> = device
        .data_items
        .iter()
        .map(|item| data_item(device_id, instance, item, &device.id, ParentType::Device))
        .collect();

    for (component, parent_id, parent_is_device) in device.all_components() {
        components.push(ComponentDefinition {
            device_id: device_id.clone(),
            agent_instance_id: instance,
            id: component.id.clone(),
            type_name: component.type_name.clone(),
            name: component.name.clone(),
            uuid: component.uuid.clone(),
            native_name: component.native_name.clone(),
            parent_id: parent_id.to_string(),
            parent_type: if parent_is_device {
                ParentType::Device
            } else {
                ParentType::Component
            },
        });
        data_items.extend(component.data_items.iter().map(|item| {
            data_item(device_id, instance, item, &component.id, ParentType::Component)
        }));
    }

    vec![
        TelemetryEvent::Agent(agent(device_id, header)),
        TelemetryEvent::Device(definition),
        TelemetryEvent::Components {
            device_id: device_id.clone(),
            agent_instance_id: instance,
            components,
        },
        TelemetryEvent::DataItems {
            device_id: device_id.clone(),
            agent_instance_id: instance,
            data_items,
        },
    ]
}

fn data_item(
    device_id: &DeviceId,
    instance: u64,
    item: &DataItemElement,
    parent_id: &str,
    parent_type: ParentType,
) -> DataItemDefinition {
    DataItemDefinition {
        device_id: device_id.clone(),
        agent_instance_id: instance,
        id: item.id.clone(),
        name: item.name.clone(),
        category: item.category,
        type_name: item.type_name.clone(),
        sub_type: item.sub_type.clone(),
        units: item.units.clone(),
        native_units: item.native_units.clone(),
        representation: item.representation.clone(),
        parent_id: parent_id.to_string(),
        parent_type,
    }
}

/// Id of the AVAILABILITY data item, preferring one on the device itself
pub(crate) fn availability_id(device: &DeviceElement) -> Option<String> {
    let is_availability = |item: &&DataItemElement| item.type_name == AVAILABILITY;
    device
        .data_items
        .iter()
        .find(is_availability)
        .or_else(|| {
            device
                .all_components()
                .into_iter()
                .find_map(|(component, _, _)| component.data_items.iter().find(is_availability))
        })
        .map(|item| item.id.clone())
}

pub(crate) fn samples(device_id: &DeviceId, instance: u64, stream: &DeviceStream) -> Vec<Sample> {
    stream
        .observations
        .iter()
        .map(|o| Sample {
            device_id: device_id.clone(),
            id: o.data_item_id.clone(),
            agent_instance_id: instance,
            sequence: o.sequence,
            timestamp: o.timestamp,
            value: o.value.clone(),
            condition: o.condition,
        })
        .collect()
}

pub(crate) fn assets(device_id: &DeviceId, doc: &AssetsDocument) -> Vec<AssetDefinition> {
    doc.assets
        .iter()
        .map(|a| AssetDefinition {
            device_id: device_id.clone(),
            asset_id: a.asset_id.clone(),
            asset_type: a.asset_type.clone(),
            timestamp: a.timestamp,
            xml: a.xml.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use mtc_core::Category;
    use pretty_assertions::assert_eq;

    use super::*;

    const PROBE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MTConnectDevices xmlns="urn:mtconnect.org:MTConnectDevices:1.3">
  <Header creationTime="2024-03-01T10:00:00Z" sender="agent" instanceId="42" version="1.3.0.18" bufferSize="131072"/>
  <Devices>
    <Device id="d1" name="Mill" uuid="mill-1">
      <DataItems>
        <DataItem id="avail" category="EVENT" type="AVAILABILITY"/>
      </DataItems>
      <Components>
        <Controller id="cont">
          <DataItems>
            <DataItem id="system" category="CONDITION" type="SYSTEM"/>
          </DataItems>
          <Components>
            <Path id="path">
              <DataItems>
                <DataItem id="exec" category="EVENT" type="EXECUTION"/>
              </DataItems>
            </Path>
          </Components>
        </Controller>
      </Components>
    </Device>
  </Devices>
</MTConnectDevices>"#;

    #[test]
    fn test_structure_order_and_parents() {
        let doc = DevicesDocument::parse(PROBE).unwrap();
        let device_id = DeviceId::derive("Mill", 5000, None);
        let device = select_device(&doc, Some("Mill")).unwrap();
        let events = structure(&device_id, &doc.header, device);

        assert!(matches!(events[0], TelemetryEvent::Agent(ref a) if a.instance_id == 42));
        assert!(matches!(events[1], TelemetryEvent::Device(_)));
        let TelemetryEvent::Components { components, .. } = &events[2] else {
            panic!("expected components");
        };
        assert_eq!(components[1].id, "path");
        assert_eq!(components[1].parent_id, "cont");
        assert_eq!(components[1].parent_type, ParentType::Component);

        let TelemetryEvent::DataItems { data_items, .. } = &events[3] else {
            panic!("expected data items");
        };
        let ids: Vec<(&str, &str)> = data_items
            .iter()
            .map(|d| (d.id.as_str(), d.parent_id.as_str()))
            .collect();
        assert_eq!(ids, vec![("avail", "d1"), ("system", "cont"), ("exec", "path")]);
        assert_eq!(data_items[1].category, Category::Condition);
    }

    #[test]
    fn test_availability_and_device_selection() {
        let doc = DevicesDocument::parse(PROBE).unwrap();
        assert_eq!(availability_id(&doc.devices[0]).as_deref(), Some("avail"));
        assert!(select_device(&doc, Some("Lathe")).is_none());
        assert_eq!(select_device(&doc, None).map(|d| d.name.as_str()), Some("Mill"));
    }
}
