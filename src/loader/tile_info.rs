use std::path::PathBuf;

use crate::types::TileAddress;

use super::request::FetchInfo;

/// Fetch parameters for one frame of a dataset.
pub trait TileInfo: Send + Sync {
    /// Identifier of the source, carried on every request.
    fn unique_id(&self) -> &str;

    /// Where to fetch `tile` from.
    fn fetch_info_for_tile(&self, tile: TileAddress) -> FetchInfo;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateTarget {
    Url,
    File,
}

/// `{z}`/`{x}`/`{y}` substitution into a URL or file path.
#[derive(Debug, Clone)]
pub struct TemplateTileInfo {
    unique_id: String,
    template: String,
    target: TemplateTarget,
}

impl TemplateTileInfo {
    pub fn url(unique_id: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            template: template.into(),
            target: TemplateTarget::Url,
        }
    }

    pub fn file(unique_id: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            template: template.into(),
            target: TemplateTarget::File,
        }
    }

    fn expand(&self, tile: TileAddress) -> String {
        self.template
            .replace("{z}", &tile.level.to_string())
            .replace("{x}", &tile.x.to_string())
            .replace("{y}", &tile.y.to_string())
    }
}

impl TileInfo for TemplateTileInfo {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn fetch_info_for_tile(&self, tile: TileAddress) -> FetchInfo {
        let expanded = self.expand(tile);
        match self.target {
            TemplateTarget::Url => FetchInfo::Url(expanded),
            TemplateTarget::File => FetchInfo::File(PathBuf::from(expanded)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_template_expansion() {
        let info = TemplateTileInfo::url("osm", "https://tiles.example/{z}/{x}/{y}.png");
        assert_eq!(info.unique_id(), "osm");
        assert_eq!(
            info.fetch_info_for_tile(TileAddress::new(2, 1, 3)),
            FetchInfo::Url("https://tiles.example/2/1/3.png".into())
        );
    }

    #[test]
    fn file_template_expansion() {
        let info = TemplateTileInfo::file("dem", "/data/dem/{z}_{x}_{y}.bin");
        assert_eq!(
            info.fetch_info_for_tile(TileAddress::new(5, 10, 4)),
            FetchInfo::File(PathBuf::from("/data/dem/5_10_4.bin"))
        );
    }
}
