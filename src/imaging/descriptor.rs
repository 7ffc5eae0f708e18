//! Deep Zoom descriptor (`.dzi`) rendering and parsing.
//!
//! The descriptor is the completeness marker of a pyramid: it is written only
//! after every tile has been encoded, so its presence is the sole signal that
//! a pyramid is ready to serve.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <Image xmlns="http://schemas.microsoft.com/deepzoom/2008" Format="jpeg" Overlap="0" TileSize="256">
//!   <Size Width="4096" Height="2048"/>
//! </Image>
//! ```

use std::path::Path;
use thiserror::Error;

const DEEP_ZOOM_NAMESPACE: &str = "http://schemas.microsoft.com/deepzoom/2008";

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Missing or malformed attribute: {0}")]
    Attribute(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub format: String,
    pub overlap: u32,
    pub tile_size: u32,
    /// Native pixel width.
    pub width: u32,
    /// Native pixel height.
    pub height: u32,
}

impl Descriptor {
    pub fn new(tile_size: u32, width: u32, height: u32) -> Self {
        Self {
            format: crate::naming::TILE_FORMAT.to_string(),
            overlap: 0,
            tile_size,
            width,
            height,
        }
    }

    pub fn to_xml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <Image xmlns=\"{DEEP_ZOOM_NAMESPACE}\" Format=\"{}\" Overlap=\"{}\" TileSize=\"{}\">\n  \
             <Size Width=\"{}\" Height=\"{}\"/>\n\
             </Image>\n",
            self.format, self.overlap, self.tile_size, self.width, self.height
        )
    }

    /// Parse the attributes this pipeline writes. Not a general XML parser.
    pub fn parse(xml: &str) -> Result<Self, DescriptorError> {
        Ok(Self {
            format: attribute(xml, "Format")
                .ok_or(DescriptorError::Attribute("Format"))?
                .to_string(),
            overlap: numeric_attribute(xml, "Overlap")?,
            tile_size: numeric_attribute(xml, "TileSize")?,
            width: numeric_attribute(xml, "Width")?,
            height: numeric_attribute(xml, "Height")?,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), DescriptorError> {
        std::fs::write(path, self.to_xml())?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, DescriptorError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }
}

/// Value of ` name="..."` in `xml`.
fn attribute<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {name}=\"");
    let start = xml.find(&needle)? + needle.len();
    let len = xml[start..].find('"')?;
    Some(&xml[start..start + len])
}

fn numeric_attribute(xml: &str, name: &'static str) -> Result<u32, DescriptorError> {
    attribute(xml, name)
        .and_then(|v| v.parse().ok())
        .ok_or(DescriptorError::Attribute(name))
}

impl From<DescriptorError> for super::backend::BackendError {
    fn from(err: DescriptorError) -> Self {
        match err {
            DescriptorError::Io(e) => Self::Io(e),
            other => Self::ProcessingFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_names_tile_size_overlap_format_and_size() {
        let xml = Descriptor::new(256, 4096, 2048).to_xml();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("xmlns=\"http://schemas.microsoft.com/deepzoom/2008\""));
        assert!(xml.contains("Format=\"jpeg\""));
        assert!(xml.contains("Overlap=\"0\""));
        assert!(xml.contains("TileSize=\"256\""));
        assert!(xml.contains("<Size Width=\"4096\" Height=\"2048\"/>"));
    }

    #[test]
    fn parse_reads_back_written_fields() {
        let descriptor = Descriptor::new(512, 10000, 8000);
        assert_eq!(Descriptor::parse(&descriptor.to_xml()).unwrap(), descriptor);
    }

    #[test]
    fn parse_foreign_attribute_order() {
        let xml = r#"<Image TileSize="254" Overlap="1" Format="png" xmlns="x"><Size Height="10" Width="20"/></Image>"#;
        let d = Descriptor::parse(xml).unwrap();
        assert_eq!(d.tile_size, 254);
        assert_eq!(d.overlap, 1);
        assert_eq!(d.format, "png");
        assert_eq!((d.width, d.height), (20, 10));
    }

    #[test]
    fn parse_missing_size_is_error() {
        let xml = r#"<Image Format="jpeg" Overlap="0" TileSize="256"></Image>"#;
        assert!(matches!(
            Descriptor::parse(xml),
            Err(DescriptorError::Attribute("Width"))
        ));
    }

    #[test]
    fn write_then_read() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("image_1.dzi");
        let descriptor = Descriptor::new(256, 300, 200);
        descriptor.write(&path).unwrap();
        assert_eq!(Descriptor::read(&path).unwrap(), descriptor);
    }
}
