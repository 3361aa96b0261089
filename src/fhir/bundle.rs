use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Search response envelope.
///
/// Every element is optional on the wire; absent arrays deserialize as empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub link: Vec<BundleLink>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub entry: Vec<BundleEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleLink {
    #[serde(default)]
    pub relation: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleEntry {
    #[serde(default, rename = "fullUrl", skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,
    #[serde(default)]
    pub resource: Value,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Bundle {
    /// URL of the link with the given relation, if any
    pub fn link_url(&self, relation: &str) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == relation && !l.url.is_empty())
            .map(|l| l.url.as_str())
    }

    /// Continuation URL for the following page
    pub fn next_url(&self) -> Option<&str> {
        self.link_url("next")
    }

    /// Continuation URL for the preceding page (`previous`, or the STU3 `prev`)
    pub fn previous_url(&self) -> Option<&str> {
        self.link_url("previous").or_else(|| self.link_url("prev"))
    }

    /// Resources whose `resourceType` matches one of `types`
    pub fn resources_of<'a>(&'a self, types: &'a [&'a str]) -> impl Iterator<Item = &'a Value> + 'a {
        self.entry
            .iter()
            .map(|e| &e.resource)
            .filter(move |r| {
                r["resourceType"]
                    .as_str()
                    .map(|t| types.contains(&t))
                    .unwrap_or(false)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bundle_tolerates_missing_arrays() {
        let bundle: Bundle = serde_json::from_value(json!({ "resourceType": "Bundle" })).unwrap();
        assert!(bundle.entry.is_empty());
        assert!(bundle.link.is_empty());
        assert!(bundle.total.is_none());

        let bundle: Bundle =
            serde_json::from_value(json!({ "resourceType": "Bundle", "entry": null, "link": null }))
                .unwrap();
        assert!(bundle.entry.is_empty());
    }

    #[test]
    fn test_pagination_links() {
        let bundle: Bundle = serde_json::from_value(json!({
            "resourceType": "Bundle",
            "total": 12,
            "link": [
                { "relation": "self", "url": "https://fhir.example.org/fhir/Practitioner?_count=5" },
                { "relation": "next", "url": "https://fhir.example.org/fhir?_getpages=abc&_getpagesoffset=5" },
                { "relation": "prev", "url": "https://fhir.example.org/fhir?_getpages=abc&_getpagesoffset=0" }
            ]
        }))
        .unwrap();

        assert_eq!(bundle.total, Some(12));
        assert!(bundle.next_url().unwrap().ends_with("offset=5"));
        assert!(bundle.previous_url().unwrap().ends_with("offset=0"));
    }

    #[test]
    fn test_resources_filtered_by_type() {
        let bundle: Bundle = serde_json::from_value(json!({
            "resourceType": "Bundle",
            "entry": [
                { "resource": { "resourceType": "Practitioner", "id": "1" } },
                { "resource": { "resourceType": "OperationOutcome" } },
                { "search": { "mode": "match" } }
            ]
        }))
        .unwrap();

        let ids: Vec<_> = bundle
            .resources_of(&["Practitioner"])
            .filter_map(|r| r["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["1"]);
    }
}
