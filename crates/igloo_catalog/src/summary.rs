//! Reading built catalogs: summary, objects, and search.

use crate::model::{CatalogObject, CatalogSummary, ObjectType};
use crate::CatalogError;
use igloo_core::fsio;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Load `catalog_summary.json` from a catalog directory.
pub fn load_summary(dir: &Path) -> Result<CatalogSummary, CatalogError> {
    let path = dir.join("catalog_summary.json");
    if !path.exists() {
        return Err(CatalogError::NotBuilt(dir.to_path_buf()));
    }
    let bytes = std::fs::read(&path)?;
    serde_json::from_slice(&bytes).map_err(|e| CatalogError::Data(e.to_string()))
}

/// Load the objects file, whichever format was written.
pub fn load_objects(dir: &Path) -> Result<Vec<CatalogObject>, CatalogError> {
    let json_path = dir.join("catalog.json");
    if json_path.exists() {
        let bytes = std::fs::read(&json_path)?;
        return serde_json::from_slice(&bytes).map_err(|e| CatalogError::Data(e.to_string()));
    }
    let jsonl_path = dir.join("catalog.jsonl");
    if jsonl_path.exists() {
        return Ok(fsio::read_jsonl(&jsonl_path)?);
    }
    Err(CatalogError::NotBuilt(dir.to_path_buf()))
}

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub qualified_name: String,
    pub object_type: ObjectType,
    pub schema: String,
    pub database: String,
    /// 0 = exact name match, 1 = name prefix, 2 = substring.
    pub rank: u8,
}

/// Search a built catalog by object name.
///
/// Exact matches rank before prefix matches before substring matches;
/// ties break alphabetically.
pub fn search(
    dir: &Path,
    query: &str,
    kind: Option<ObjectType>,
    limit: usize,
) -> Result<Vec<SearchHit>, CatalogError> {
    let needle = query.trim().to_ascii_uppercase();
    if needle.is_empty() {
        return Ok(vec![]);
    }

    let mut hits: Vec<SearchHit> = load_objects(dir)?
        .into_iter()
        .filter(|obj| kind.map(|k| obj.object_type == k).unwrap_or(true))
        .filter_map(|obj| {
            let name = obj.name.to_ascii_uppercase();
            let rank = if name == needle {
                0
            } else if name.starts_with(&needle) {
                1
            } else if name.contains(&needle) {
                2
            } else {
                return None;
            };
            Some(SearchHit {
                qualified_name: obj.qualified_name(),
                object_type: obj.object_type,
                schema: obj.schema,
                database: obj.database,
                rank,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        a.rank
            .cmp(&b.rank)
            .then_with(|| a.qualified_name.cmp(&b.qualified_name))
    });
    hits.truncate(limit);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn object(name: &str, object_type: ObjectType) -> CatalogObject {
        CatalogObject {
            database: "DB".to_string(),
            schema: "PUBLIC".to_string(),
            name: name.to_string(),
            object_type,
            columns: vec![],
            ddl: None,
            last_altered: None,
            row_count: None,
            comment: None,
        }
    }

    fn write_catalog(dir: &Path, objects: &[CatalogObject]) {
        fsio::atomic_write_json(&dir.join("catalog.json"), &objects.to_vec()).unwrap();
    }

    #[test]
    fn test_search_ranking() {
        let temp = TempDir::new().unwrap();
        write_catalog(
            temp.path(),
            &[
                object("ORDERS_ARCHIVE", ObjectType::Table),
                object("ORDERS", ObjectType::Table),
                object("CUSTOMER_ORDERS", ObjectType::View),
            ],
        );

        let hits = search(temp.path(), "orders", None, 10).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].qualified_name, "DB.PUBLIC.ORDERS");
        assert_eq!(hits[0].rank, 0);
        assert_eq!(hits[1].qualified_name, "DB.PUBLIC.ORDERS_ARCHIVE");
        assert_eq!(hits[2].qualified_name, "DB.PUBLIC.CUSTOMER_ORDERS");
    }

    #[test]
    fn test_search_kind_filter_and_limit() {
        let temp = TempDir::new().unwrap();
        write_catalog(
            temp.path(),
            &[
                object("ORDERS", ObjectType::Table),
                object("ORDERS_V", ObjectType::View),
            ],
        );

        let hits = search(temp.path(), "orders", Some(ObjectType::View), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].object_type, ObjectType::View);

        let hits = search(temp.path(), "orders", None, 1).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_missing_catalog_errors() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            load_objects(temp.path()),
            Err(CatalogError::NotBuilt(_))
        ));
        assert!(matches!(
            load_summary(temp.path()),
            Err(CatalogError::NotBuilt(_))
        ));
    }

    #[test]
    fn test_load_objects_from_jsonl() {
        let temp = TempDir::new().unwrap();
        for obj in [object("A", ObjectType::Table), object("B", ObjectType::View)] {
            fsio::append_jsonl(&temp.path().join("catalog.jsonl"), &obj).unwrap();
        }
        let objects = load_objects(temp.path()).unwrap();
        assert_eq!(objects.len(), 2);
    }
}
