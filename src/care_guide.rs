use crate::filter::{filter_items, Searchable, ALL_CATEGORIES};
use crate::models::Disease;

pub const CATEGORIES: [&str; 5] = [ALL_CATEGORIES, "Common", "Severe", "Chronic", "Infectious"];

const CATALOG: &[(&str, &str, &str)] = &[
    ("Acne", "Common", "Inflammatory condition of the skin"),
    ("Eczema", "Chronic", "Group of conditions causing skin inflammation"),
    ("Psoriasis", "Chronic", "Skin cells build up forming scales and dry patches"),
    ("Rosacea", "Chronic", "Condition causing redness and visible blood vessels"),
    ("Melasma", "Common", "Condition causing brown patches on face"),
    ("Vitiligo", "Chronic", "Loss of skin color in patches"),
    ("Hives", "Common", "Raised, itchy welts appearing on the skin"),
    ("Skin Cancer", "Severe", "Abnormal growth of skin cells"),
    ("Warts", "Infectious", "Small growths caused by viral infection"),
    ("Fungal Infections", "Infectious", "Skin infections caused by fungi"),
    ("Contact Dermatitis", "Common", "Rash from contact with irritants or allergens"),
    ("Cold Sores", "Infectious", "Small blisters caused by herpes virus"),
    ("Alopecia Areata", "Chronic", "Autoimmune disorder causing hair loss"),
    ("Scabies", "Infectious", "Skin infestation caused by tiny mites"),
    ("Lupus Rash", "Severe", "Butterfly-shaped rash on face from autoimmune condition"),
];

impl Searchable for Disease {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.description.as_str()]
    }

    fn category(&self) -> Option<&str> {
        Some(self.category.as_str())
    }
}

pub fn builtin_catalog() -> Vec<Disease> {
    CATALOG
        .iter()
        .enumerate()
        .map(|(i, (name, category, description))| Disease {
            id: (i + 1).to_string(),
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
        })
        .collect()
}

/// The care-guide screen: a fixed catalog narrowed by text and category.
pub struct CareGuide {
    diseases: Vec<Disease>,
    search: String,
    category: String,
}

impl Default for CareGuide {
    fn default() -> Self {
        CareGuide::new(builtin_catalog())
    }
}

impl CareGuide {
    pub fn new(diseases: Vec<Disease>) -> Self {
        CareGuide {
            diseases,
            search: String::new(),
            category: ALL_CATEGORIES.to_string(),
        }
    }

    pub fn set_search(&mut self, query: impl Into<String>) {
        self.search = query.into();
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_category(&mut self, category: impl Into<String>) {
        self.category = category.into();
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn visible(&self) -> Vec<&Disease> {
        filter_items(&self.diseases, &self.search, Some(&self.category))
    }

    pub fn summary(&self) -> String {
        match self.visible().len() {
            1 => "1 condition found".to_string(),
            n => format!("{} conditions found", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_categories_are_selectable() {
        let catalog = builtin_catalog();
        assert_eq!(catalog.len(), 15);
        assert!(catalog
            .iter()
            .all(|d| CATEGORIES[1..].contains(&d.category.as_str())));
    }

    #[test]
    fn test_all_category_shows_everything() {
        let guide = CareGuide::default();
        assert_eq!(guide.visible().len(), 15);
        assert_eq!(guide.summary(), "15 conditions found");
    }

    #[test]
    fn test_search_and_category_combine() {
        let mut guide = CareGuide::default();
        guide.set_category("Infectious");
        assert_eq!(guide.visible().len(), 4);

        guide.set_search("VIRUS");
        let names: Vec<_> = guide.visible().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Cold Sores"]);
        assert_eq!(guide.summary(), "1 condition found");

        guide.set_category(ALL_CATEGORIES);
        guide.set_search("patches");
        let names: Vec<_> = guide.visible().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Psoriasis", "Melasma", "Vitiligo"]);
    }

    #[test]
    fn test_no_match() {
        let mut guide = CareGuide::default();
        guide.set_search("fracture");
        assert!(guide.visible().is_empty());
        assert_eq!(guide.summary(), "0 conditions found");
    }
}
