use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

use promptloops_llm::{Persona, PersonaTrait};

/// Injected conversational phrase pools keyed by persona trait.
///
/// Keeping these as data rather than code branches lets callers swap in
/// domain-specific pools without touching the executor.
#[derive(Debug, Clone)]
pub struct PhraseBook {
    starters: HashMap<PersonaTrait, Vec<String>>,
    follow_ups: HashMap<PersonaTrait, Vec<String>>,
    closing_phrases: Vec<String>,
}

impl PhraseBook {
    pub fn new(
        starters: HashMap<PersonaTrait, Vec<String>>,
        follow_ups: HashMap<PersonaTrait, Vec<String>>,
        closing_phrases: Vec<String>,
    ) -> Self {
        Self {
            starters,
            follow_ups,
            closing_phrases,
        }
    }

    /// Pick an opening message uniformly at random from the persona's pool.
    pub fn starter_for<R: Rng + ?Sized>(&self, persona: &Persona, rng: &mut R) -> Option<String> {
        self.starters
            .get(&persona.primary_trait())
            .and_then(|pool| pool.choose(rng))
            .cloned()
    }

    /// Deterministic follow-up used when user-turn generation fails.
    ///
    /// Cycles through the persona's pool by turn index so reruns of the same
    /// failing session produce the same transcript.
    pub fn fallback_follow_up(&self, persona: &Persona, turn_index: usize) -> String {
        let pool = self
            .follow_ups
            .get(&persona.primary_trait())
            .filter(|pool| !pool.is_empty());
        match pool {
            Some(pool) => pool[turn_index % pool.len()].clone(),
            None => "Can you tell me more about that?".to_string(),
        }
    }

    /// Whether an agent reply signals the conversation is wrapping up.
    pub fn is_closing(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.closing_phrases.iter().any(|p| lowered.contains(p))
    }
}

impl Default for PhraseBook {
    fn default() -> Self {
        let mut starters = HashMap::new();
        starters.insert(
            PersonaTrait::Curious,
            strings(&[
                "Hi! I came across your product and I'd love to learn what it does.",
                "Hello, can you walk me through how this works?",
                "Hey there, what makes your product different from others?",
            ]),
        );
        starters.insert(
            PersonaTrait::Skeptical,
            strings(&[
                "I've seen a lot of products promise this. Why should I believe yours works?",
                "Before we go further, what proof do you have that this actually delivers?",
                "I'm not convinced. What do your existing customers say?",
            ]),
        );
        starters.insert(
            PersonaTrait::Frustrated,
            strings(&[
                "I've been trying to solve this for weeks and nothing works. Can you actually help?",
                "Honestly I'm fed up with tools that don't deliver. What do you have?",
                "This is my third attempt at finding something that works. Convince me.",
            ]),
        );
        starters.insert(
            PersonaTrait::BudgetConscious,
            strings(&[
                "What does this cost? I have a very limited budget.",
                "Before anything else, how much is this going to run me?",
                "Is there a free tier? I can't justify another subscription.",
            ]),
        );
        starters.insert(
            PersonaTrait::TechSavvy,
            strings(&[
                "Does your product expose an API? I need to integrate it with our stack.",
                "What's the architecture here? I care about latency and data residency.",
                "Can I self-host this, and what does the webhook story look like?",
            ]),
        );
        starters.insert(
            PersonaTrait::Impatient,
            strings(&[
                "Quick question, no fluff: what does this do and what does it cost?",
                "I have two minutes. Give me the short version.",
                "Skip the pitch. Does it solve scheduling or not?",
            ]),
        );

        let mut follow_ups = HashMap::new();
        follow_ups.insert(
            PersonaTrait::Curious,
            strings(&[
                "Interesting, can you go deeper on that?",
                "How does that compare to what competitors offer?",
                "What would getting started look like for me?",
            ]),
        );
        follow_ups.insert(
            PersonaTrait::Skeptical,
            strings(&[
                "That sounds good on paper. What's the catch?",
                "Do you have numbers to back that up?",
                "And what happens when it doesn't work as advertised?",
            ]),
        );
        follow_ups.insert(
            PersonaTrait::Frustrated,
            strings(&[
                "I've heard that before. How is this time different?",
                "Fine, but how long until I actually see results?",
                "Just tell me plainly whether this fixes my problem.",
            ]),
        );
        follow_ups.insert(
            PersonaTrait::BudgetConscious,
            strings(&[
                "Is there a cheaper plan that still covers the basics?",
                "What am I locked into if I sign up?",
                "Any discounts for small teams?",
            ]),
        );
        follow_ups.insert(
            PersonaTrait::TechSavvy,
            strings(&[
                "What rate limits should I plan around?",
                "How do you handle authentication and data export?",
                "Is the SDK open source?",
            ]),
        );
        follow_ups.insert(
            PersonaTrait::Impatient,
            strings(&[
                "Shorter answer please. Yes or no?",
                "Okay, and the price?",
                "Fine. What's the next step?",
            ]),
        );

        let closing_phrases = strings(&[
            "is there anything else",
            "have a great day",
            "goodbye",
            "thanks for chatting",
            "glad i could help",
            "feel free to reach out",
        ]);

        Self {
            starters,
            follow_ups,
            closing_phrases,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona(traits: Vec<PersonaTrait>) -> Persona {
        Persona {
            id: "p1".into(),
            name: "Test".into(),
            traits,
            system_fragment: None,
        }
    }

    #[test]
    fn test_starter_comes_from_primary_trait_pool() {
        let book = PhraseBook::default();
        let persona = persona(vec![PersonaTrait::BudgetConscious, PersonaTrait::Curious]);
        let mut rng = rand::thread_rng();

        for _ in 0..10 {
            let starter = book.starter_for(&persona, &mut rng).unwrap();
            assert!(
                starter.contains("cost")
                    || starter.contains("budget")
                    || starter.contains("free tier")
                    || starter.contains("subscription"),
                "unexpected starter: {}",
                starter
            );
        }
    }

    #[test]
    fn test_fallback_follow_up_is_deterministic() {
        let book = PhraseBook::default();
        let persona = persona(vec![PersonaTrait::Skeptical]);

        let a = book.fallback_follow_up(&persona, 4);
        let b = book.fallback_follow_up(&persona, 4);
        assert_eq!(a, b);

        // Cycles through the pool by index
        let pool_len = 3;
        assert_eq!(
            book.fallback_follow_up(&persona, 1),
            book.fallback_follow_up(&persona, 1 + pool_len)
        );
    }

    #[test]
    fn test_closing_detection_is_case_insensitive() {
        let book = PhraseBook::default();
        assert!(book.is_closing("Great! Is there anything ELSE I can help with?"));
        assert!(book.is_closing("Goodbye and good luck!"));
        assert!(!book.is_closing("Our pricing starts at $29 per month."));
    }

    #[test]
    fn test_empty_traits_fall_back_to_default_pool() {
        let book = PhraseBook::default();
        let persona = persona(vec![]);
        // primary_trait defaults to Curious
        assert!(book.starter_for(&persona, &mut rand::thread_rng()).is_some());
    }
}
