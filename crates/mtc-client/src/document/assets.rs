//! `MTConnectAssets` documents

use chrono::{DateTime, Utc};
use roxmltree::Node;

use super::{child, element_children, header_of, parse_root, parse_timestamp, required_attr, Header};
use crate::error::Result;

/// Response to an `assets` request
#[derive(Debug, Clone)]
pub struct AssetsDocument {
    pub header: Header,
    pub assets: Vec<AssetElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetElement {
    pub asset_id: String,
    /// Element name, e.g. `CuttingTool`
    pub asset_type: String,
    pub device_uuid: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// The asset element exactly as sent by the agent
    pub xml: String,
}

impl AssetsDocument {
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = parse_root(xml, "MTConnectAssets")?;
        let root = doc.root_element();
        let header = header_of(root)?;

        let assets = match child(root, "Assets") {
            Some(assets) => element_children(assets)
                .map(|node| AssetElement::parse(node, xml))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self { header, assets })
    }
}

impl AssetElement {
    fn parse(node: Node<'_, '_>, input: &str) -> Result<Self> {
        Ok(Self {
            asset_id: required_attr(node, "assetId")?.to_string(),
            asset_type: node.tag_name().name().to_string(),
            device_uuid: node.attribute("deviceUuid").map(str::to_string),
            timestamp: node
                .attribute("timestamp")
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
            xml: input[node.range()].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assets_keeps_raw_xml() {
        let xml = r#"<MTConnectAssets>
  <Header creationTime="2017-03-01T12:00:10Z" sender="agent01" instanceId="1" version="1.3.0.17" bufferSize="131072"/>
  <Assets>
    <CuttingTool assetId="T1" deviceUuid="000" timestamp="2017-03-01T11:00:00Z"><Description>Drill</Description></CuttingTool>
  </Assets>
</MTConnectAssets>"#;
        let doc = AssetsDocument::parse(xml).unwrap();
        assert_eq!(doc.assets.len(), 1);
        let tool = &doc.assets[0];
        assert_eq!(tool.asset_id, "T1");
        assert_eq!(tool.asset_type, "CuttingTool");
        assert!(tool.xml.starts_with("<CuttingTool"));
        assert!(tool.xml.ends_with("</CuttingTool>"));
    }
}
