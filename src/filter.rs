use crate::constants::SituationType;
use crate::digitraffic_api::Feature;

/// Entity-local view over the coordinator's feature list.
///
/// The coordinator caches everything it fetched; each entity narrows that
/// list down with its own filter so one cache serves every entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    /// Lower-cased; empty matches every municipality
    municipalities: Vec<String>,
    situation_types: Option<Vec<SituationType>>,
}

impl MessageFilter {
    pub fn new<S: AsRef<str>>(
        municipalities: &[S],
        situation_types: Option<Vec<SituationType>>,
    ) -> Self {
        Self {
            municipalities: municipalities
                .iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            situation_types,
        }
    }

    /// Matches every feature
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_situation_types(mut self, situation_types: Option<Vec<SituationType>>) -> Self {
        self.situation_types = situation_types;
        self
    }

    pub fn matches(&self, feature: &Feature) -> bool {
        self.matches_municipality(feature) && self.matches_situation_type(feature)
    }

    /// Matching features in their original order
    pub fn apply<'a>(&self, features: &'a [Feature]) -> Vec<&'a Feature> {
        features.iter().filter(|f| self.matches(f)).collect()
    }

    fn matches_municipality(&self, feature: &Feature) -> bool {
        if self.municipalities.is_empty() {
            return true;
        }
        feature
            .municipalities()
            .iter()
            .any(|m| self.municipalities.contains(&m.to_lowercase()))
    }

    fn matches_situation_type(&self, feature: &Feature) -> bool {
        let Some(allowed) = &self.situation_types else {
            return true;
        };
        feature
            .situation_type()
            .and_then(|raw| raw.parse::<SituationType>().ok())
            .is_some_and(|t| allowed.contains(&t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digitraffic_api::{FeatureProperties, TrafficMessageCollection};

    fn feature(municipality: &str, situation_type: &str) -> Feature {
        Feature {
            geometry: None,
            properties: FeatureProperties {
                municipality: Some(municipality.to_string()),
                situation_type: Some(situation_type.to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_empty_list_stays_empty() {
        let filters = [
            MessageFilter::all(),
            MessageFilter::new(&["Helsinki"], None),
            MessageFilter::new(&["Turku"], Some(vec![SituationType::RoadWork])),
        ];
        for filter in filters {
            assert!(filter.apply(&[]).is_empty());
        }
    }

    #[test]
    fn test_matching_municipality_keeps_everything_in_order() {
        let features = vec![
            feature("Helsinki", "ROAD_WORK"),
            feature("HELSINKI", "TRAFFIC_ANNOUNCEMENT"),
            feature("helsinki", "WEIGHT_RESTRICTION"),
        ];
        let filter = MessageFilter::new(&["hElSiNkI"], None);
        let result: Vec<Feature> = filter.apply(&features).into_iter().cloned().collect();
        assert_eq!(result, features);
    }

    #[test]
    fn test_empty_municipality_filter_returns_cache() {
        let features = vec![
            feature("Helsinki", "ROAD_WORK"),
            feature("Turku", "TRAFFIC_ANNOUNCEMENT"),
        ];
        let filter = MessageFilter::new::<&str>(&[], None);
        assert_eq!(filter.apply(&features).len(), features.len());
    }

    #[test]
    fn test_filter_order_does_not_matter() {
        let features = vec![
            feature("Helsinki", "ROAD_WORK"),
            feature("Turku", "ROAD_WORK"),
            feature("Helsinki", "TRAFFIC_ANNOUNCEMENT"),
        ];
        let by_type = MessageFilter::all().with_situation_types(Some(vec![SituationType::RoadWork]));
        let by_town = MessageFilter::new(&["Helsinki"], None);
        let combined = MessageFilter::new(&["Helsinki"], Some(vec![SituationType::RoadWork]));

        let type_first: Vec<Feature> = by_type.apply(&features).into_iter().cloned().collect();
        let type_then_town: Vec<&Feature> = by_town.apply(&type_first);
        let town_first: Vec<Feature> = by_town.apply(&features).into_iter().cloned().collect();
        let town_then_type: Vec<&Feature> = by_type.apply(&town_first);

        assert_eq!(type_then_town, town_then_type);
        assert_eq!(combined.apply(&features), type_then_town);
        assert_eq!(combined.apply(&features).len(), 1);
    }

    #[test]
    fn test_unknown_situation_type_excluded_when_types_selected() {
        let features = vec![feature("Helsinki", "SOMETHING_NEW")];
        let filter = MessageFilter::all().with_situation_types(Some(SituationType::ALL.to_vec()));
        assert!(filter.apply(&features).is_empty());
        assert_eq!(MessageFilter::all().apply(&features).len(), 1);
    }

    #[test]
    fn test_matches_secondary_road_point() {
        let collection: TrafficMessageCollection = serde_json::from_str(
            r#"{"features": [{"properties": {"announcements": [{"locationDetails": {"roadAddressLocation": {
                "primaryPoint": {"municipality": "Vantaa"},
                "secondaryPoint": {"municipality": "Kerava"}
            }}}]}}]}"#,
        )
        .unwrap();
        assert_eq!(MessageFilter::new(&["kerava"], None).apply(&collection.features).len(), 1);
        assert!(MessageFilter::new(&["Tuusula"], None).apply(&collection.features).is_empty());
    }

    #[test]
    fn test_helsinki_scenario() {
        let collection: TrafficMessageCollection = serde_json::from_str(
            r#"{"features": [{"properties": {"municipality": "Helsinki", "situationType": "TRAFFIC_ANNOUNCEMENT"}}]}"#,
        )
        .unwrap();
        assert_eq!(MessageFilter::all().apply(&collection.features).len(), 1);
        assert_eq!(MessageFilter::new(&["Turku"], None).apply(&collection.features).len(), 0);
        assert_eq!(MessageFilter::new(&["Helsinki"], None).apply(&collection.features).len(), 1);
    }
}
