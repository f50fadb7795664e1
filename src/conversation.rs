//! Memoria de conversación de una sesión de chat.

use crate::models::{ChatMessage, ChatRole, ConversationTurn};

/// Historial ordenado de turnos; sólo admite añadir al final.
#[derive(Debug, Clone, Default)]
pub struct ConversationManager {
    turns: Vec<ConversationTurn>,
    max_turns: Option<usize>,
}

impl ConversationManager {
    /// `max_turns` limita cuántos turnos recientes se exponen al prompt;
    /// el historial completo se conserva.
    pub fn new(max_turns: Option<usize>) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    pub fn append(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.turns.push(ConversationTurn::completed(user, assistant));
    }

    /// Turnos que se pasan al sintetizador (sufijo acotado si hay límite).
    pub fn history(&self) -> &[ConversationTurn] {
        match self.max_turns {
            Some(max) if self.turns.len() > max => &self.turns[self.turns.len() - max..],
            _ => &self.turns,
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Convierte el historial por roles de la interfaz de chat en turnos.
///
/// Un mensaje de usuario sin respuesta queda como turno en curso; una
/// respuesta sin pregunta previa se asocia a un mensaje de usuario vacío.
pub fn turns_from_messages(messages: &[ChatMessage]) -> Vec<ConversationTurn> {
    let mut turns = Vec::new();
    let mut pending_user: Option<String> = None;

    for message in messages {
        match message.role {
            ChatRole::User => {
                if let Some(user) = pending_user.take() {
                    turns.push(ConversationTurn {
                        user,
                        assistant: None,
                    });
                }
                pending_user = Some(message.content.clone());
            }
            ChatRole::Assistant => turns.push(ConversationTurn {
                user: pending_user.take().unwrap_or_default(),
                assistant: Some(message.content.clone()),
            }),
        }
    }

    if let Some(user) = pending_user {
        turns.push(ConversationTurn {
            user,
            assistant: None,
        });
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: ChatRole, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn appends_in_order() {
        let mut memory = ConversationManager::new(None);
        memory.append("¿Qué es un retriever?", "Un componente que busca pasajes.");
        memory.append("¿Y un vector store?", "Un índice de embeddings.");

        let history = memory.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].user, "¿Qué es un retriever?");
        assert_eq!(history[1].assistant.as_deref(), Some("Un índice de embeddings."));
    }

    #[test]
    fn bounded_history_exposes_the_latest_turns() {
        let mut memory = ConversationManager::new(Some(2));
        for i in 0..5 {
            memory.append(format!("q{i}"), format!("a{i}"));
        }
        let users: Vec<&str> = memory.history().iter().map(|t| t.user.as_str()).collect();
        assert_eq!(users, vec!["q3", "q4"]);
        assert_eq!(memory.len(), 5);
    }

    #[test]
    fn clear_resets_the_session() {
        let mut memory = ConversationManager::new(None);
        memory.append("q", "a");
        memory.clear();
        assert!(memory.is_empty());
    }

    #[test]
    fn pairs_role_messages_into_turns() {
        let turns = turns_from_messages(&[
            msg(ChatRole::User, "hola"),
            msg(ChatRole::Assistant, "¿en qué te ayudo?"),
            msg(ChatRole::User, "sin respuesta"),
            msg(ChatRole::User, "otra"),
            msg(ChatRole::Assistant, "vale"),
        ]);

        assert_eq!(
            turns,
            vec![
                ConversationTurn::completed("hola", "¿en qué te ayudo?"),
                ConversationTurn {
                    user: "sin respuesta".into(),
                    assistant: None
                },
                ConversationTurn::completed("otra", "vale"),
            ]
        );
    }

    #[test]
    fn trailing_user_message_is_in_flight() {
        let turns = turns_from_messages(&[msg(ChatRole::User, "pendiente")]);
        assert_eq!(turns.len(), 1);
        assert!(turns[0].assistant.is_none());
    }

    #[test]
    fn orphan_assistant_message_gets_empty_user() {
        let turns = turns_from_messages(&[msg(ChatRole::Assistant, "bienvenido")]);
        assert_eq!(turns, vec![ConversationTurn::completed("", "bienvenido")]);
    }
}
