use serde::Serialize;
use tracing::info;

use super::client::VisionModel;
use crate::images::ImageAsset;
use crate::meals::{extract::extract, NutritionRecord};

pub const SYSTEM_PROMPT: &str = "You are a nutrition expert analyzing food images.";

pub const INSTRUCTION: &str = "\
Identify the food items on this plate and estimate their weights.
Then, calculate the total calories and macronutrient breakdown (carbs, protein, fat).
Add a little text to explain your analysis (be brief, just a few words per food item).
At the end add a \"Total\" section with total calories, carbs, fat, protein
displayed like this:
**Total Nutrition Summary:**

- **Total Calories:** (total of calories) calories
- **Total Carbohydrates:** (total of carbohydrates)g
- **Total Fat:** (total of fat)g
- **Total Protein:** (total of protein)g
";

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub record: NutritionRecord,
    pub raw_text: String,
}

/// One model call for one image, no retry.
pub async fn analyze(model: &dyn VisionModel, image: &ImageAsset) -> anyhow::Result<Analysis> {
    let raw_text = model.complete(SYSTEM_PROMPT, INSTRUCTION, &image.data_uri()).await?;
    let record = extract(&raw_text);
    info!(?record, "analysis complete");
    Ok(Analysis { record, raw_text })
}
