//! Rule-based task classification.
//!
//! Pure function of the request content: no I/O, no model calls. Image
//! requests are always Multimodal. Text requests route by keyword and by a
//! chemical-formula scan that biases equation-looking input to Calculation.

use crate::error::OrchestratorError;
use crate::request::{Modality, Request};

/// Category a request is routed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCategory {
    /// Conceptual question answered with retrieved context plus experts.
    KnowledgeQa,
    /// Numeric or symbolic chemistry work (stoichiometry, balancing).
    Calculation,
    /// Explicit request to look something up in the knowledge base.
    RetrievalLookup,
    /// Image input: extract the question first, then answer it.
    Multimodal,
}

/// Phrases that mark a request as calculation work.
const CALCULATION_KEYWORDS: &[&str] = &[
    "calculate",
    "compute",
    "how many grams",
    "how many moles",
    "mass of",
    "molar mass",
    "molar",
    "mole",
    "moles",
    "concentration",
    "molarity",
    "balance",
    "balancing",
    "molecular weight",
    "stoichiometry",
    "yield",
    "ph of",
];

/// Phrases that mark an explicit knowledge-base lookup.
const LOOKUP_KEYWORDS: &[&str] = &[
    "textbook",
    "past paper",
    "practice problem",
    "look up",
    "from the syllabus",
    "course notes",
];

/// Classify a request. Fails only on input that cannot be routed at all.
pub fn classify(request: &Request) -> Result<TaskCategory, OrchestratorError> {
    if request.modality == Modality::Image {
        if request.image_bytes.as_deref().map_or(true, <[u8]>::is_empty) {
            return Err(OrchestratorError::invalid_request(
                "image request without image bytes",
            ));
        }
        return Ok(TaskCategory::Multimodal);
    }

    let text = request.raw_content.trim();
    if text.is_empty() {
        return Err(OrchestratorError::invalid_request("empty question"));
    }

    let lowered = text.to_lowercase();

    if LOOKUP_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        return Ok(TaskCategory::RetrievalLookup);
    }
    if CALCULATION_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        return Ok(TaskCategory::Calculation);
    }
    if contains_equation(text) {
        return Ok(TaskCategory::Calculation);
    }

    Ok(TaskCategory::KnowledgeQa)
}

/// Detect chemical-equation shape: a reaction arrow with formula-looking
/// terms (element symbol followed by a digit) on the text.
fn contains_equation(text: &str) -> bool {
    let has_arrow = text.contains("->") || text.contains('→') || text.contains('=');
    has_arrow && contains_formula(text)
}

/// A formula term is an uppercase letter, optionally a lowercase letter,
/// immediately followed by a digit (H2, Cl2, O3).
fn contains_formula(text: &str) -> bool {
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if !b.is_ascii_uppercase() {
            continue;
        }
        let mut j = i + 1;
        if j < bytes.len() && bytes[j].is_ascii_lowercase() {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    #[test]
    fn empty_text_is_invalid() {
        let err = classify(&Request::text("   ")).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
    }

    #[test]
    fn image_routes_to_multimodal() {
        let request = Request::image(vec![0xFF, 0xD8], "");
        assert_eq!(classify(&request).unwrap(), TaskCategory::Multimodal);
    }

    #[test]
    fn image_without_bytes_is_invalid() {
        let mut request = Request::image(Vec::new(), "hint");
        request.image_bytes = None;
        assert!(classify(&request).is_err());
        let request = Request::image(Vec::new(), "hint");
        assert!(classify(&request).is_err());
    }

    #[test]
    fn calculation_keywords_route_to_calculation() {
        let request = Request::text("Calculate the molar mass of CaCO3");
        assert_eq!(classify(&request).unwrap(), TaskCategory::Calculation);
    }

    #[test]
    fn equation_shape_routes_to_calculation() {
        let request = Request::text("Balance: H2 + O2 -> H2O");
        assert_eq!(classify(&request).unwrap(), TaskCategory::Calculation);
    }

    #[test]
    fn lookup_keywords_route_to_retrieval_lookup() {
        let request = Request::text("Find a practice problem on redox reactions");
        assert_eq!(classify(&request).unwrap(), TaskCategory::RetrievalLookup);
    }

    #[test]
    fn conceptual_question_routes_to_knowledge_qa() {
        let request = Request::text("Why do ionic compounds conduct electricity when molten?");
        assert_eq!(classify(&request).unwrap(), TaskCategory::KnowledgeQa);
    }

    #[test]
    fn arrow_without_formula_is_not_an_equation() {
        let request = Request::text("Explain why A -> B in reaction kinetics diagrams");
        assert_eq!(classify(&request).unwrap(), TaskCategory::KnowledgeQa);
    }
}
