use rand::Rng;

use crate::model::{Rotation, SendTarget};

/// Choose the template for this step. Sequential rotation moves `cursor`
/// forward by one on every call.
pub fn pick<'a, R: Rng + ?Sized>(
    templates: &'a [String],
    rotation: Rotation,
    cursor: &mut usize,
    rng: &mut R,
) -> &'a str {
    let index = match rotation {
        Rotation::Random => rng.gen_range(0..templates.len()),
        Rotation::Sequential => {
            let i = *cursor % templates.len();
            *cursor = cursor.wrapping_add(1);
            i
        }
    };
    &templates[index]
}

/// Fill `[Name]` and `[Company]` placeholders.
pub fn render(template: &str, target: &SendTarget) -> String {
    template
        .replace("[Name]", &target.name)
        .replace("[Company]", &target.company_name)
}

/// Templates worth sending: anything with non-whitespace content.
pub fn usable(templates: &[String]) -> Vec<String> {
    templates
        .iter()
        .filter(|t| !t.trim().is_empty())
        .cloned()
        .collect()
}
