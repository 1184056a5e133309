use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A drug registered by one user. `owner_user_id` never changes after insert.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Drug {
    pub drug_id: i32,
    pub owner_user_id: i32,
    pub drug_name: String,
    pub drug_description: Option<String>,
    pub expiration_date: DateTime<Utc>,
    pub drug_form_id: i32,
    pub alert_sent: bool,
    pub alert_sent_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DrugForm {
    pub drug_form_id: i32,
    pub name: String,
}

/// A drug with its form loaded in the same query.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DrugWithForm {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub drug: Drug,
    #[sqlx(flatten)]
    pub form: DrugForm,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FormCount {
    pub form_name: String,
    pub drug_count: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewDrug {
    pub owner_user_id: i32,
    pub drug_name: String,
    pub drug_description: Option<String>,
    pub expiration_date: DateTime<Utc>,
    pub drug_form_id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn drug_with_form_serializes_drug_fields_at_top_level() {
        let item = DrugWithForm {
            drug: Drug {
                drug_id: 3,
                owner_user_id: 7,
                drug_name: "Ibuprofen".to_string(),
                drug_description: None,
                expiration_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                drug_form_id: 2,
                alert_sent: false,
                alert_sent_at: None,
            },
            form: DrugForm {
                drug_form_id: 2,
                name: "TABLET".to_string(),
            },
        };

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["drug_id"], 3);
        assert_eq!(json["owner_user_id"], 7);
        assert_eq!(json["form"]["name"], "TABLET");
        assert!(json["alert_sent_at"].is_null());
    }
}
