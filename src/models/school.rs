use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::Path;

/// A school known to the program, with the district it belongs to and its
/// parent account id in the CRM.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SchoolMapping {
    pub id: i32,
    pub name: String,
    pub district: String,
    pub parent_salesforce_id: String,
}

/// Row shape of the school-mappings CSV file.
#[derive(Debug, Clone, Deserialize)]
pub struct SchoolMappingRow {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "District")]
    pub district: String,
    #[serde(rename = "Parent_Salesforce_ID")]
    pub parent_salesforce_id: String,
}

pub fn load_from_csv(path: impl AsRef<Path>) -> Result<Vec<SchoolMappingRow>, String> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .map_err(|e| format!("Failed to open {}: {e}", path.as_ref().display()))?;

    let mut rows = Vec::new();
    for record in reader.deserialize::<SchoolMappingRow>() {
        let row = record.map_err(|e| format!("Malformed school mapping row: {e}"))?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_rows_from_csv() {
        let mut file = tempfile_path("school-mappings-test.csv");
        writeln!(file.1, "Name,District,Parent_Salesforce_ID").unwrap();
        writeln!(file.1, "Lincoln Prep,KCPS (MO),0015f00000AbCdEFGH").unwrap();
        writeln!(file.1, "Schlagle,KCKPS (KS),0015f00000ZyXwVUTS").unwrap();
        file.1.flush().unwrap();

        let rows = load_from_csv(&file.0).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Lincoln Prep");
        assert_eq!(rows[1].district, "KCKPS (KS)");

        std::fs::remove_file(&file.0).ok();
    }

    fn tempfile_path(name: &str) -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(name);
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
