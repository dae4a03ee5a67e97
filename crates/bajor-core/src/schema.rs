/// Column names and Arrow schemas for prediction catalogs.
pub mod catalog {
    use arrow::datatypes::{DataType, Field, Schema};

    /// Unique subject identifier column.
    pub const SUBJECT_ID: &str = "subject_id";
    /// Remote image location column.
    pub const IMAGE_URL: &str = "image_url";

    /// Minimal schema a prediction catalog must satisfy.
    ///
    /// Extra columns (volunteer vote counts, metadata) are allowed and ignored
    /// at prediction time.
    pub fn prediction_catalog_schema() -> Schema {
        Schema::new(vec![
            Field::new(SUBJECT_ID, DataType::Utf8, false),
            Field::new(IMAGE_URL, DataType::Utf8, false),
        ])
    }

    /// Schema for a catalog carrying numeric answer columns as training labels.
    pub fn labelled_catalog_schema(label_cols: &[String]) -> Schema {
        let mut fields = prediction_catalog_schema().fields().to_vec();
        for col in label_cols {
            fields.push(std::sync::Arc::new(Field::new(col, DataType::Float32, true)));
        }
        Schema::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::catalog;

    #[test]
    fn prediction_catalog_schema_has_expected_fields() {
        let schema = catalog::prediction_catalog_schema();
        assert_eq!(schema.fields().len(), 2);
        assert!(schema.field_with_name("subject_id").is_ok());
        assert!(schema.field_with_name("image_url").is_ok());
    }

    #[test]
    fn labelled_catalog_schema_appends_answers() {
        let labels = vec![
            "smooth-or-featured_smooth".to_string(),
            "smooth-or-featured_featured-or-disk".to_string(),
        ];
        let schema = catalog::labelled_catalog_schema(&labels);
        assert_eq!(schema.fields().len(), 4);
        assert!(
            schema
                .field_with_name("smooth-or-featured_featured-or-disk")
                .is_ok()
        );
    }
}
