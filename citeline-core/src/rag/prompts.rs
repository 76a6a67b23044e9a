//! Prompt templates for chunking and answer generation.

use super::retriever::RetrievedChunk;

/// Output budget for semantic chunking; the reply repeats the page text.
pub const CHUNKING_MAX_TOKENS: usize = 8192;

pub const CHUNKING_SYSTEM_PROMPT: &str = r#"You split document pages into self-contained passages for a search index.

RULES:
1. Split at natural boundaries: sections, topic changes, list or table edges
2. Keep each passage between roughly 200 and 2000 characters
3. Copy the text exactly; never summarize, rewrite or drop content
4. Keep a table together with the sentence that introduces it
5. Set "has_table" to true when the passage contains a [Table] block
6. Set "section_title" to the nearest heading when one is visible, otherwise null

Output format: Return a JSON object:
{"chunks": [{"content": "...", "has_table": false, "section_title": "Overview"}]}"#;

pub fn chunking_user_message(text: &str, page_context: &str) -> String {
    format!(
        "{page_context}\n\nText:\n{text}\n\nSplit this text into passages. Return ONLY the JSON object."
    )
}

pub const GROUNDED_SYSTEM_PROMPT: &str = r#"You are a precise document question-answering assistant.

Answer ONLY from the numbered sources provided. Never use outside knowledge.

CRITICAL RULES:
1. Every claim in the answer must be supported by a source and cited inline as [Source N]
2. Quotes must be copied verbatim from the cited source
3. If the sources do not contain the answer, set "not_found" to true
4. Be concise; do not speculate beyond the sources

Output format: Return a JSON object with:
- "answer": The answer with inline citations [Source N]
- "citations": Array of objects with "source_index" (1-based) and "verbatim_quote" (exact supporting text)
- "not_found": Boolean, true if the sources don't contain relevant information"#;

pub fn grounded_user_message(query: &str, context: &str) -> String {
    format!(
        "Question: {query}\n\nSources:\n{context}\n\nAnswer using only these sources. Return ONLY the JSON object."
    )
}

pub const AGGREGATED_SYSTEM_PROMPT: &str = r#"You are a precise document question-answering assistant specializing in aggregating information from multiple sources.

Your task is to compile a COMPLETE list or answer by synthesizing information from ALL provided sources.

CRITICAL RULES:
1. AGGREGATE information from ALL sources, not just one
2. For each item in your list, cite the specific source(s) where it was found using [Source N]
3. If the same item appears in several sources, list it once and cite every source
4. ONLY include information actually present in the sources; never fabricate
5. If sources hold partial or different information about the same item, synthesize it
6. Put each list item on its own line

Output format: Return a JSON object with:
- "answer": Your complete aggregated answer with inline citations [Source N] for each item
- "citations": Array of objects with "source_index" (1-based) and "verbatim_quote" (exact text supporting an item)
- "not_found": Boolean, true if sources don't contain relevant information

Example for "Who are the managers?":
{
  "answer": "The managers are:\n\n1. John Smith - Regional Manager [Source 1]\n2. Jane Doe - Department Manager [Source 1, Source 2]",
  "citations": [
    {"source_index": 1, "verbatim_quote": "John Smith serves as Regional Manager"},
    {"source_index": 1, "verbatim_quote": "Jane Doe is the Department Manager"},
    {"source_index": 2, "verbatim_quote": "Jane Doe manages the engineering department"}
  ],
  "not_found": false
}"#;

pub fn aggregated_user_message(query: &str, context: &str) -> String {
    format!(
        "Question: {query}\n\nSources:\n{context}\n\nCompile a COMPLETE answer by aggregating information from ALL sources. For list queries, include ALL matching items found across all documents. Return ONLY the JSON object."
    )
}

/// `[Source N: name, page P]` blocks separated by `---`.
pub fn format_sources(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "[Source {}: {}, page {}]\n{}\n",
                i + 1,
                chunk.document_name,
                chunk.page_number,
                chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retrieved(name: &str, page: u32, content: &str) -> RetrievedChunk {
        RetrievedChunk {
            id: format!("{name}-{page}"),
            content: content.into(),
            document_id: name.into(),
            document_name: name.into(),
            page_number: page,
            page_end: None,
            chunk_index: 0,
            has_table: false,
            similarity_score: 0.5,
            relevance_score: 0.5,
        }
    }

    #[test]
    fn test_format_sources_numbering() {
        let context = format_sources(&[
            retrieved("a.pdf", 2, "Alpha text"),
            retrieved("b.pdf", 7, "Beta text"),
        ]);
        assert_eq!(
            context,
            "[Source 1: a.pdf, page 2]\nAlpha text\n\n---\n[Source 2: b.pdf, page 7]\nBeta text\n"
        );
    }

    #[test]
    fn test_user_messages_embed_question() {
        assert!(grounded_user_message("Why?", "ctx").starts_with("Question: Why?"));
        assert!(aggregated_user_message("Who?", "ctx").contains("Sources:\nctx"));
        assert!(chunking_user_message("body", "Document: a.pdf, page 1").contains("body"));
    }
}
