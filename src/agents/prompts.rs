//! Prompt templates for every agent role.
//!
//! Templates use `{name}` placeholders filled by [`PromptTemplate::render`].
//! All answers request MathJax-compatible notation with `\ce{}` for formulas
//! and equations so the frontend renders chemistry correctly.

/// A static prompt template with `{name}` placeholders.
pub struct PromptTemplate {
    pub template: &'static str,
}

impl PromptTemplate {
    pub const fn new(template: &'static str) -> Self {
        Self { template }
    }

    /// Substitute `{key}` with `value` for each pair. Unknown placeholders
    /// are left as-is.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let mut out = self.template.to_string();
        for (key, value) in vars {
            out = out.replace(&format!("{{{key}}}"), value);
        }
        out
    }
}

/// Shared formatting instructions appended to every answering persona.
const FORMAT_RULES: &str = "\
Formatting rules:\n\
- Write chemical formulas and equations in MathJax-compatible notation using \\ce{}, \
e.g. \\ce{2H2 + O2 -> 2H2O}.\n\
- Write mathematical expressions in LaTeX between $ delimiters.\n\
- Show intermediate steps for any calculation.";

/// Chemistry teacher persona for knowledge questions.
pub const TEACHER_SYSTEM: PromptTemplate = PromptTemplate::new(
    "You are an experienced chemistry teacher. Explain concepts clearly and \
     accurately at a level suitable for a motivated student, building from \
     fundamentals to the specific question.\n\n{format_rules}",
);

/// Chemistry expert persona for independent external models.
pub const EXPERT_SYSTEM: PromptTemplate = PromptTemplate::new(
    "You are a chemistry expert. Give a precise, scientifically rigorous \
     answer. State assumptions explicitly and flag any ambiguity in the \
     question.\n\n{format_rules}",
);

/// Knowledge question grounded in retrieved passages.
pub const GROUNDED_QUESTION: PromptTemplate = PromptTemplate::new(
    "Reference material:\n{context}\n\n\
     Using the reference material where relevant (and your own knowledge where \
     it is not sufficient), answer the question:\n\n{question}",
);

/// Knowledge question with no retrieved context.
pub const PLAIN_QUESTION: PromptTemplate = PromptTemplate::new("{question}");

/// Calculation agent persona.
pub const TOOLS_SYSTEM: PromptTemplate = PromptTemplate::new(
    "You are a chemistry problem solver. Work through calculations step by \
     step: identify the given quantities, choose the governing relationship, \
     balance any equations involved, and carry units through every step. \
     Verify the final answer before stating it.\n\n{format_rules}",
);

/// Vision follow-up: answer a question extracted from an image.
pub const EXTRACTED_QUESTION: PromptTemplate = PromptTemplate::new(
    "The following chemistry problem was transcribed from an image. Solve it \
     completely:\n\n{question}",
);

// =============================================================================
// FUSION JUDGE
// =============================================================================

/// Judge persona for comparing candidate answers.
pub const JUDGE_SYSTEM: PromptTemplate = PromptTemplate::new(
    "You are a senior chemistry reviewer. You will be shown one question and \
     several candidate answers from different models. Compare them on \
     accuracy, completeness, and scientific rigor, then produce the single \
     best final answer, correcting any errors you find.\n\n{format_rules}",
);

/// Judge task: labeled candidates plus output contract.
pub const JUDGE_TASK: PromptTemplate = PromptTemplate::new(
    "Question:\n{question}\n\n\
     Candidate answers:\n{candidates}\n\
     First compare the candidates on accuracy, completeness, and scientific \
     rigor. Then write the best possible final answer. Output exactly two \
     sections:\n\n\
     COMPARISON:\n<your comparison of the candidates>\n\n\
     FINAL ANSWER:\n<the complete final answer>",
);

/// Label for the nth candidate in the judge prompt (A, B, C, ...).
pub fn candidate_label(index: usize) -> char {
    (b'A' + (index % 26) as u8) as char
}

/// Assemble the labeled candidate block for the judge task.
pub fn render_candidates(candidates: &[(String, String)]) -> String {
    let mut block = String::new();
    for (i, (backend, answer)) in candidates.iter().enumerate() {
        block.push_str(&format!(
            "--- Candidate {} (from {}) ---\n{}\n\n",
            candidate_label(i),
            backend,
            answer
        ));
    }
    block
}

/// Render a persona template with the shared formatting rules filled in.
pub fn render_system(template: &PromptTemplate) -> String {
    template.render(&[("format_rules", FORMAT_RULES)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_placeholders() {
        let t = PromptTemplate::new("Q: {question} K: {kept}");
        let out = t.render(&[("question", "why")]);
        assert_eq!(out, "Q: why K: {kept}");
    }

    #[test]
    fn personas_carry_format_rules() {
        let out = render_system(&TEACHER_SYSTEM);
        assert!(out.contains("\\ce{}"));
        assert!(!out.contains("{format_rules}"));
    }

    #[test]
    fn candidate_labels_ascend() {
        assert_eq!(candidate_label(0), 'A');
        assert_eq!(candidate_label(2), 'C');
    }

    #[test]
    fn candidate_block_labels_each_answer() {
        let block = render_candidates(&[
            ("zhipu".to_string(), "answer one".to_string()),
            ("deepseek".to_string(), "answer two".to_string()),
        ]);
        assert!(block.contains("Candidate A (from zhipu)"));
        assert!(block.contains("Candidate B (from deepseek)"));
    }
}
