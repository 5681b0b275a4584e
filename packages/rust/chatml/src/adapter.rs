//! Maps ChatML messages onto the provider-neutral prompt shape.

use doctrans_shared::{Prompt, Turn, TurnRole};

use crate::{Message, Role};

/// Build a [`Prompt`] from parsed messages.
///
/// The first SYSTEM message becomes the system instruction. Later SYSTEM
/// messages have no slot of their own and are dropped. USER maps to a user
/// turn; ASSISTANT, MODEL and ALTERNATIVE map to model turns.
pub fn to_prompt(messages: &[Message]) -> Prompt {
    let mut system_instruction = None;
    let mut turns = Vec::with_capacity(messages.len());

    for (index, message) in messages.iter().enumerate() {
        let role = match message.role {
            Role::System => {
                if system_instruction.is_none() {
                    system_instruction = Some(message.content.clone());
                } else {
                    tracing::debug!(index, "ignoring additional SYSTEM message");
                }
                continue;
            }
            Role::User => TurnRole::User,
            Role::Assistant | Role::Model | Role::Alternative => TurnRole::Model,
        };
        turns.push(Turn {
            role,
            text: message.content.clone(),
        });
    }

    Prompt {
        system_instruction,
        turns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_system_becomes_instruction() {
        let prompt = to_prompt(&[
            Message::new(Role::System, "rules"),
            Message::new(Role::User, "q1"),
            Message::new(Role::System, "more rules"),
            Message::new(Role::Alternative, "a1"),
            Message::new(Role::Assistant, "a2"),
            Message::new(Role::User, "q2"),
        ]);

        assert_eq!(prompt.system_instruction.as_deref(), Some("rules"));
        let roles: Vec<TurnRole> = prompt.turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![TurnRole::User, TurnRole::Model, TurnRole::Model, TurnRole::User]
        );
        assert_eq!(prompt.turns[3].text, "q2");
    }

    #[test]
    fn no_system_message() {
        let prompt = to_prompt(&[Message::new(Role::Model, "hi")]);
        assert!(prompt.system_instruction.is_none());
        assert_eq!(prompt.turns.len(), 1);
    }
}
