//! Síntesis de respuestas RAG.
//!
//! Flujo:
//!   1. Se valida la pregunta (vacía → error, sin tocar retriever ni LLM).
//!   2. Si hay historial, el LLM reescribe la pregunta de seguimiento como una
//!      pregunta autónoma; ésa es la que se usa para recuperar.
//!   3. Recuperación fusionada de los `k_total` pasajes más relevantes.
//!   4. Construcción de un único prompt: persona, contexto, historial y la
//!      pregunta tal y como la escribió el usuario.
//!   5. El LLM responde; la respuesta se devuelve junto a sus fuentes.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    error::{RagError, Result},
    llm::LanguageModel,
    models::{AnswerResult, ConversationTurn, RetrievalResult},
    retriever::Retriever,
};

pub const NO_CONTEXT_ANSWER: &str =
    "I could not find relevant information in the indexed documents to answer this question.";

pub struct AnswerSynthesizer {
    retriever: Arc<dyn Retriever>,
    model: Arc<dyn LanguageModel>,
    k_total: usize,
    persona: String,
}

impl AnswerSynthesizer {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        model: Arc<dyn LanguageModel>,
        k_total: usize,
        persona: impl Into<String>,
    ) -> Self {
        Self {
            retriever,
            model,
            k_total,
            persona: persona.into(),
        }
    }

    /// Lanza una consulta RAG con el historial de la sesión.
    pub async fn answer(&self, question: &str, history: &[ConversationTurn]) -> Result<AnswerResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput(
                "La pregunta no puede estar vacía.".to_string(),
            ));
        }

        let search_text = if history.is_empty() {
            question.to_string()
        } else {
            self.standalone_question(question, history).await?
        };

        let sources = self.retriever.query(&search_text, self.k_total).await?;
        if sources.is_empty() {
            info!("Sin pasajes relevantes; no se invoca al modelo");
            return Ok(AnswerResult {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources,
            });
        }

        let prompt = build_prompt(&self.persona, &sources, history, question);
        let answer = self.model.generate(&prompt).await.map_err(|e| {
            error!("Fallo del modelo de lenguaje: {e}");
            e
        })?;

        let answer = answer.trim();
        if answer.is_empty() {
            error!("El modelo devolvió una respuesta vacía");
            return Err(RagError::model("el modelo devolvió una respuesta vacía"));
        }

        info!(
            sources = sources.len(),
            history_turns = history.len(),
            "Respuesta generada"
        );
        Ok(AnswerResult {
            answer: answer.to_string(),
            sources,
        })
    }

    /// Reescribe una pregunta de seguimiento para que se entienda sin el
    /// historial. Si el modelo no devuelve nada, se busca con la original.
    async fn standalone_question(&self, question: &str, history: &[ConversationTurn]) -> Result<String> {
        let prompt = build_condense_prompt(history, question);
        let rewritten = self.model.generate(&prompt).await.map_err(|e| {
            error!("Fallo del modelo al reescribir la pregunta: {e}");
            e
        })?;

        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            warn!("Reescritura vacía; se recupera con la pregunta original");
            return Ok(question.to_string());
        }
        debug!(standalone = rewritten, "Pregunta reescrita");
        Ok(rewritten.to_string())
    }
}

fn push_history(prompt: &mut String, history: &[ConversationTurn]) {
    for turn in history {
        prompt.push_str(&format!("User: {}\n", turn.user));
        if let Some(assistant) = &turn.assistant {
            prompt.push_str(&format!("Assistant: {assistant}\n"));
        }
    }
}

/// Prompt para convertir una pregunta de seguimiento en una pregunta autónoma.
pub fn build_condense_prompt(history: &[ConversationTurn], question: &str) -> String {
    let mut prompt = String::from(
        "Given the following conversation and a follow up question, rephrase the follow up \
question to be a standalone question, in its original language.\n\nChat History:\n",
    );
    push_history(&mut prompt, history);
    prompt.push_str(&format!("Follow Up Input: {question}\nStandalone question:"));
    prompt
}

/// Construye el prompt estructurado que recibe el modelo. La pregunta se
/// inserta tal cual.
pub fn build_prompt(
    persona: &str,
    passages: &[RetrievalResult],
    history: &[ConversationTurn],
    question: &str,
) -> String {
    let context = passages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut prompt = format!("{persona}\n\nContext:\n{context}\n\n");

    if !history.is_empty() {
        prompt.push_str("Chat history:\n");
        push_history(&mut prompt, history);
        prompt.push('\n');
    }

    prompt.push_str(&format!("Question: {question}\n\nAnswer:"));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelFailure;
    use crate::mock::{ScriptedModel, StaticRetriever};

    fn passage(text: &str) -> RetrievalResult {
        RetrievalResult {
            text: text.to_string(),
            source: "docs/docs_v1.txt".to_string(),
            score: 0.8,
            collection: "docs_v1".to_string(),
            rank: 0,
        }
    }

    fn synthesizer(
        retriever: Arc<StaticRetriever>,
        model: Arc<ScriptedModel>,
    ) -> AnswerSynthesizer {
        AnswerSynthesizer::new(retriever, model, 5, "You are LangAssist.")
    }

    #[tokio::test]
    async fn blank_question_fails_before_any_call() {
        let retriever = Arc::new(StaticRetriever::new(vec![passage("ctx")]));
        let model = Arc::new(ScriptedModel::with_responses(vec![]));
        let rag = synthesizer(retriever.clone(), model.clone());

        for question in ["", "   ", "\n\t"] {
            let err = rag.answer(question, &[]).await.unwrap_err();
            assert_eq!(err.kind(), "invalid_input");
        }
        assert_eq!(retriever.call_count(), 0);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn answers_with_sources_in_retrieval_order() {
        let retriever = Arc::new(StaticRetriever::new(vec![passage("primero"), passage("segundo")]));
        let model = Arc::new(ScriptedModel::with_responses(vec!["  Usa FAISS.  ".to_string()]));
        let rag = synthesizer(retriever, model.clone());

        let result = rag.answer("¿Qué vector store uso?", &[]).await.unwrap();
        assert_eq!(result.answer, "Usa FAISS.");
        let texts: Vec<&str> = result.sources.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["primero", "segundo"]);

        let prompt = &model.prompts()[0];
        assert!(prompt.starts_with("You are LangAssist."));
        assert!(prompt.contains("Context:\nprimero\n\nsegundo"));
        assert!(prompt.ends_with("Question: ¿Qué vector store uso?\n\nAnswer:"));
    }

    #[tokio::test]
    async fn model_failure_is_surfaced_with_its_kind() {
        let retriever = Arc::new(StaticRetriever::new(vec![passage("ctx")]));
        let model = Arc::new(ScriptedModel::failing(ModelFailure::RateLimited));
        let rag = synthesizer(retriever, model.clone());

        let err = rag.answer("hola", &[]).await.unwrap_err();
        match err {
            RagError::ModelInvocation { kind, .. } => assert_eq!(kind, ModelFailure::RateLimited),
            other => panic!("error inesperado: {other}"),
        }
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn no_passages_skips_the_model() {
        let retriever = Arc::new(StaticRetriever::new(Vec::new()));
        let model = Arc::new(ScriptedModel::with_responses(vec![]));
        let rag = synthesizer(retriever, model.clone());

        let result = rag.answer("algo", &[]).await.unwrap();
        assert_eq!(result.answer, NO_CONTEXT_ANSWER);
        assert!(result.sources.is_empty());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn blank_model_reply_is_a_model_error() {
        let retriever = Arc::new(StaticRetriever::new(vec![passage("ctx")]));
        let model = Arc::new(ScriptedModel::with_responses(vec!["  \n".into()]));
        let rag = synthesizer(retriever, model);

        let err = rag.answer("hola", &[]).await.unwrap_err();
        assert_eq!(err.kind(), "model_invocation_error");
    }

    #[tokio::test]
    async fn question_is_trimmed_once_for_retrieval_and_prompt() {
        let retriever = Arc::new(StaticRetriever::new(vec![passage("ctx")]));
        let model = Arc::new(ScriptedModel::with_responses(vec!["ok".into()]));
        let rag = synthesizer(retriever.clone(), model.clone());

        rag.answer("  What is LCEL?\n", &[]).await.unwrap();
        assert_eq!(retriever.queries(), vec!["What is LCEL?".to_string()]);
        assert!(model.prompts()[0].ends_with("Question: What is LCEL?\n\nAnswer:"));
    }

    #[tokio::test]
    async fn follow_up_is_rewritten_before_retrieval() {
        let retriever = Arc::new(StaticRetriever::new(vec![passage("FAISS.save_local")]));
        let model = Arc::new(ScriptedModel::with_responses(vec![
            "How do I persist a FAISS vector store?".into(),
            "Call save_local.".into(),
        ]));
        let rag = synthesizer(retriever.clone(), model.clone());
        let history = vec![ConversationTurn::completed(
            "What is FAISS?",
            "A vector store.",
        )];

        let result = rag.answer("and how do I persist it?", &history).await.unwrap();
        assert_eq!(result.answer, "Call save_local.");
        assert_eq!(
            retriever.queries(),
            vec!["How do I persist a FAISS vector store?".to_string()]
        );

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("User: What is FAISS?\nAssistant: A vector store.\n"));
        assert!(prompts[0].ends_with("Follow Up Input: and how do I persist it?\nStandalone question:"));
        assert!(prompts[1].ends_with("Question: and how do I persist it?\n\nAnswer:"));
    }

    #[tokio::test]
    async fn blank_rewrite_falls_back_to_the_question() {
        let retriever = Arc::new(StaticRetriever::new(vec![passage("ctx")]));
        let model = Arc::new(ScriptedModel::with_responses(vec![" ".into(), "ok".into()]));
        let rag = synthesizer(retriever.clone(), model);
        let history = vec![ConversationTurn::completed("q", "a")];

        rag.answer("¿y ahora?", &history).await.unwrap();
        assert_eq!(retriever.queries(), vec!["¿y ahora?".to_string()]);
    }

    #[test]
    fn prompt_keeps_history_in_order_before_the_question() {
        let history = vec![
            ConversationTurn::completed("What is a chain?", "A sequence of calls."),
            ConversationTurn::completed("And memory?", "State between calls."),
        ];
        let question = "How do I combine them?";
        let prompt = build_prompt("Persona.", &[passage("ctx")], &history, question);

        let first = prompt.find("User: What is a chain?").unwrap();
        let first_answer = prompt.find("Assistant: A sequence of calls.").unwrap();
        let second = prompt.find("User: And memory?").unwrap();
        let second_answer = prompt.find("Assistant: State between calls.").unwrap();
        let asked = prompt.find("Question: How do I combine them?").unwrap();
        assert!(first < first_answer && first_answer < second);
        assert!(second < second_answer && second_answer < asked);
    }

    #[test]
    fn prompt_without_history_has_no_history_section() {
        let prompt = build_prompt("Persona.", &[passage("ctx")], &[], "q");
        assert!(!prompt.contains("Chat history:"));
        assert_eq!(prompt, "Persona.\n\nContext:\nctx\n\nQuestion: q\n\nAnswer:");
    }
}
