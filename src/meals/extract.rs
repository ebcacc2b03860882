use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::dto::NutritionRecord;

/// A pure parser from model output to a nutrition record.
pub type Strategy = fn(&str) -> Option<NutritionRecord>;

/// Tried in order, the first one that yields a record wins.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("structured", parse_structured as Strategy),
    ("labels", parse_labels as Strategy),
];

pub fn extract(text: &str) -> NutritionRecord {
    for (name, strategy) in STRATEGIES {
        if let Some(record) = strategy(text) {
            debug!(strategy = *name, ?record, "nutrition extracted");
            return record;
        }
    }
    NutritionRecord::default()
}

/// Model answered with a JSON object instead of prose.
pub fn parse_structured(text: &str) -> Option<NutritionRecord> {
    let Value::Object(map) = serde_json::from_str::<Value>(text.trim()).ok()? else {
        return None;
    };
    let num = |key: &str| map.get(key).and_then(as_number);
    Some(NutritionRecord {
        calories: num("calories").map(to_calories),
        protein: num("protein"),
        carbs: num("carbs"),
        fat: num("fat"),
    })
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_calories(v: f64) -> i64 {
    v.round() as i64
}

lazy_static! {
    static ref CALORIES_RE: Regex = label(r"total\s+calories", r"calories");
    static ref PROTEIN_RE: Regex = label(r"total\s+protein", r"g");
    static ref CARBS_RE: Regex = label(r"total\s+carbohydrates", r"g");
    static ref FAT_RE: Regex = label(r"total\s+fat", r"g");
}

// `**Total Fat :** 20g`, `**Total Fat**: **20** g`, `Total Fat: 20 g`, ...
fn label(name: &str, unit: &str) -> Regex {
    let pattern = format!(r"(?i){name}[\s*]*:[\s*]*(\d+(?:\.\d+)?)[\s*]*{unit}");
    Regex::new(&pattern).unwrap()
}

/// Narrative fallback. Always yields a record; labels that never appear stay absent.
pub fn parse_labels(text: &str) -> Option<NutritionRecord> {
    Some(NutritionRecord {
        calories: last_match(&CALORIES_RE, text).map(to_calories),
        protein: last_match(&PROTEIN_RE, text),
        carbs: last_match(&CARBS_RE, text),
        fat: last_match(&FAT_RE, text),
    })
}

// Totals are stated at the end, per-item mentions earlier.
fn last_match(re: &Regex, text: &str) -> Option<f64> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = "\
Grilled chicken breast (~150g): lean protein.
Rice (~200g): carbs.

**Total Nutrition Summary:**

- **Total Calories:** 680 calories
- **Total Carbohydrates :** 55g
- **Total Fat:** 20g
- **Total Protein:** 42g
";

    #[test]
    fn parses_summary_block() {
        let record = extract(SUMMARY);
        assert_eq!(
            record,
            NutritionRecord {
                calories: Some(680),
                protein: Some(42.0),
                carbs: Some(55.0),
                fat: Some(20.0),
            }
        );
    }

    #[test]
    fn last_occurrence_wins() {
        let text = "Total Calories: 120 calories for the toast. \
                    Later on... Total Calories: 450 calories overall.";
        assert_eq!(parse_labels(text).unwrap().calories, Some(450));
    }

    #[test]
    fn missing_label_is_absent_not_zero() {
        let text = "Total Calories: 300 calories\nTotal Protein: 12g\nTotal Carbohydrates: 40g";
        let record = parse_labels(text).unwrap();
        assert_eq!(record.fat, None);
        assert_eq!(record.calories, Some(300));
        assert_eq!(record.protein, Some(12.0));
    }

    #[test]
    fn labels_are_case_insensitive() {
        let record = parse_labels("TOTAL FAT: 7.5 G and total protein:3g").unwrap();
        assert_eq!(record.fat, Some(7.5));
        assert_eq!(record.protein, Some(3.0));
    }

    #[test]
    fn bold_markers_anywhere_around_the_value() {
        let record = parse_labels(
            "**Total Fat**: 20g\nTotal Protein: **42**g\n**Total Carbohydrates:** **55** g\n\
             **Total Calories** : **680** calories",
        )
        .unwrap();
        assert_eq!(
            record,
            NutritionRecord {
                calories: Some(680),
                protein: Some(42.0),
                carbs: Some(55.0),
                fat: Some(20.0),
            }
        );
    }

    #[test]
    fn fractional_calories_round() {
        let record = parse_labels("**Total Calories:** 680.6 calories").unwrap();
        assert_eq!(record.calories, Some(681));
    }

    #[test]
    fn prose_without_labels_yields_empty_record() {
        let record = extract("I can't tell what is on this plate.");
        assert!(record.is_empty());
    }

    #[test]
    fn structured_payload_takes_precedence() {
        let text = r#"{"calories": 510, "protein": 30.5, "carbs": "44", "fat": null}"#;
        assert_eq!(
            extract(text),
            NutritionRecord {
                calories: Some(510),
                protein: Some(30.5),
                carbs: Some(44.0),
                fat: None,
            }
        );
    }

    #[test]
    fn structured_ignores_labels_inside_json() {
        let text = r#"{"calories": 100, "note": "Total Calories: 999 calories"}"#;
        assert_eq!(extract(text).calories, Some(100));
    }

    #[test]
    fn structured_rejects_non_objects() {
        assert_eq!(parse_structured("[1, 2, 3]"), None);
        assert_eq!(parse_structured("42"), None);
        assert_eq!(parse_structured(SUMMARY), None);
    }
}
