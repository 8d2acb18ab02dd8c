//! Evaluation prompts.
//!
//! The agent first orders two keyword lists so that matching phrases line up
//! at the front, then counts the matches. The assistant prompts enforce the
//! two answer shapes.

/// Order both lists by similarity.
/// Placeholders: {candidate_label}, {reference_label}, {candidate_keywords}, {reference_keywords}
pub const ORDER_LISTS: &str = r#"Now compare two keyword lists that describe the research topics of the same publication.

{candidate_label}: {candidate_keywords}
{reference_label}: {reference_keywords}

Reorder both lists. Put keywords that match a keyword of the other list at the beginning, in the same position in both lists. Keywords match if they are identical, synonyms, or paraphrases of the same research topic. Put keywords without a match at the end of their list. Do not add, drop or rename keywords.

Answer in exactly this format and nothing else:
{candidate_label}: keyword, keyword, ...
{reference_label}: keyword, keyword, ..."#;

/// Count matching pairs in the ordered lists.
/// Placeholders: {candidate_label}, {reference_label}, {candidate_ordered}, {reference_ordered}
pub const COUNT_MATCHES: &str = r#"These are the two ordered lists:

{candidate_label}: {candidate_ordered}
{reference_label}: {reference_ordered}

Count the pairs of matching keywords at the beginning of the lists. A keyword can be part of at most one pair.

Answer only with the number."#;

/// Assistant check for the ordered-lists answer.
/// Placeholders: {agent_output}, {candidate_label}, {reference_label}
pub const CHECK_ORDERED_LISTS: &str = r#"Another GPT was asked to answer with two labelled comma-separated keyword lists. Check its answer below and remove anything that is not part of the two lists. Do not change the order or the keywords.

Answer of the other GPT:
{agent_output}

Answer in exactly this format:
{candidate_label}: keyword, keyword, ...
{reference_label}: keyword, keyword, ..."#;

/// Assistant check for the count answer.
/// Placeholders: {agent_output}
pub const CHECK_COUNT: &str = r#"Another GPT was asked to answer with a single number. Check its answer below. If it contains anything besides the number, remove it.

Answer of the other GPT:
{agent_output}

Answer only with the number, written with digits."#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::template::placeholders;

    #[test]
    fn test_order_prompt_placeholders() {
        assert_eq!(
            placeholders(ORDER_LISTS).unwrap(),
            vec!["candidate_keywords", "candidate_label", "reference_keywords", "reference_label"]
        );
    }

    #[test]
    fn test_count_prompt_placeholders() {
        assert_eq!(
            placeholders(COUNT_MATCHES).unwrap(),
            vec!["candidate_label", "candidate_ordered", "reference_label", "reference_ordered"]
        );
        assert_eq!(placeholders(CHECK_COUNT).unwrap(), vec!["agent_output"]);
    }
}
