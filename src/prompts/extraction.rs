//! Topic extraction prompts.
//!
//! Three agent prompts drive the chain (literal, expanded, review); the
//! assistant prompts coerce each agent answer into a bare comma-separated list.

/// Persona for the extraction/evaluation agent conversation
pub const AGENT_PERSONA: &str =
    "Hello GPT, you are my very helpful and intelligent assistant for a difficult task today.";

/// Persona for the stateless format-checking assistant
pub const ASSISTANT_PERSONA: &str =
    "Hello GPT, you are my very helpful and intelligent assistant for checking the answers of another GPT sister of yourself.";

/// Step 1: keywords that literally occur in the publication data.
/// Placeholders: {title}, {keywords}, {abstract}
pub const LITERAL_EXTRACTION: &str = r#"You are an expert in the field of computer science and in building scientific knowledge graphs. Your task is to extract the research topics of a scientific publication as keywords or short keyword phrases.

In this first step, only select keywords that appear literally in the title, the author keywords or the abstract. Do not simply copy the author keywords: judge each of them and keep only those that describe a research topic of the publication. Select, do not enumerate. A good result usually has between 2 and 18 keywords.

Example 1:
Title: Ontology-based semantic annotation of research papers
Author keywords: ontology, semantic annotation, digital libraries
Abstract: We present an approach that annotates research papers with concepts of a domain ontology. The annotations are used to improve retrieval in digital libraries and to build a scholarly knowledge graph.
Result: ontology, semantic annotation, research papers, digital libraries, retrieval, scholarly knowledge graph

Example 2:
Title: Convolutional neural networks for malware detection on mobile devices
Author keywords: deep learning, android, security
Abstract: Mobile malware is a growing threat. We train convolutional neural networks on bytecode images of Android applications and reach a detection accuracy above 97 percent while keeping inference cheap enough for mobile devices.
Result: convolutional neural networks, malware detection, mobile devices, deep learning, android, mobile malware, security

Now do the same for this publication.
Title: {title}
Author keywords: {keywords}
Abstract: {abstract}

Answer only with the comma-separated list of keywords."#;

/// Step 2: add semantically related keywords to the literal list.
/// Placeholders: {literal_keywords}
pub const EXPANDED_EXTRACTION: &str = r#"Very good. These are the literal keywords you selected:
{literal_keywords}

Now add keywords that do not appear literally in the publication data but describe its research topics: synonyms, broader and narrower terms, and close variants of the most important keywords. Keep every keyword of the list above and append the new ones at the end. A good result usually has between 4 and 33 keywords.

Answer only with the complete comma-separated list of keywords."#;

/// Step 3: review and confirm the final list.
/// Placeholders: {expanded_keywords}
pub const SELF_REVIEW: &str = r#"Please review your keyword list once more:
{expanded_keywords}

You may remove keywords that do not describe a research topic of the publication, and you may reorder the list. Do not add keywords that are not supported by the publication data or the list above. If the list is already good, repeat it unchanged.

Answer only with the final comma-separated list of keywords."#;

/// Assistant check for a keyword list answer.
/// Placeholders: {agent_output}
pub const CHECK_KEYWORD_LIST: &str = r#"Another GPT was asked to answer with a comma-separated list of keywords only. Check its answer below. If the answer contains anything besides the keywords (introductions, explanations, numbering, line breaks, quotes), remove it. Do not add, remove or change any keyword.

Answer of the other GPT:
{agent_output}

Answer only with the corrected comma-separated list of keywords on a single line."#;

/// Retry after a rejected check.
/// Placeholders: {agent_output}, {rejected_output}, {rejection_reason}
pub const CORRECTION: &str = r#"Your previous correction was rejected.

Original answer of the other GPT:
{agent_output}

Your rejected correction:
{rejected_output}

Reason: {rejection_reason}

Try again and follow the required output format exactly. Output nothing else."#;
