//! Text normalization: sentences, tokens, base forms, tags, and key terms.
//!
//! Everything here is rule-based and deterministic. The tagger and
//! lemmatizer are small and only need to be consistent
//! between student text, reference text, and vocabulary terms.

use std::collections::{HashMap, HashSet};

use crate::model::{NormalizedText, PosTag, Sentence, Span, Token};

/// Upper bound on extracted key terms.
pub const MAX_KEY_TERMS: usize = 20;

/// Longest noun phrase kept as a key term, in tokens.
const MAX_PHRASE_TOKENS: usize = 4;

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "it's", "its", "itself",
    "just", "me", "might", "more", "most", "must", "my", "myself", "no", "nor", "not", "now",
    "of", "off", "on", "once", "only", "or", "other", "our", "ours", "ourselves", "out", "over",
    "own", "same", "shall", "she", "should", "so", "some", "such", "than", "that", "the",
    "their", "theirs", "them", "themselves", "then", "there", "these", "they", "this", "those",
    "through", "to", "too", "under", "until", "up", "very", "was", "we", "were", "what", "when",
    "where", "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your",
    "yours", "yourself", "yourselves", "may", "also", "via",
];

const DETERMINERS: &[&str] = &[
    "a", "an", "the", "this", "that", "these", "those", "each", "every", "any", "some", "no",
    "all", "both", "either", "neither", "another", "such", "what", "which", "whose",
];

const PRONOUNS: &[&str] = &[
    "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them", "my", "your",
    "his", "its", "our", "their", "mine", "yours", "itself", "themselves", "myself", "who",
    "whom", "one",
];

const PREPOSITIONS: &[&str] = &[
    "of", "in", "on", "at", "by", "for", "with", "from", "to", "into", "onto", "about", "over",
    "under", "between", "through", "during", "before", "after", "above", "below", "across",
    "along", "around", "against", "among", "within", "without", "via", "per", "than", "like",
    "until", "toward", "towards", "upon",
];

const CONJUNCTIONS: &[&str] = &[
    "and", "or", "but", "nor", "so", "yet", "because", "although", "though", "while",
    "whereas", "if", "unless", "since", "whether", "where", "when", "how", "why",
];

const AUXILIARIES: &[&str] = &[
    "is", "are", "was", "were", "be", "been", "being", "am", "do", "does", "did", "have", "has",
    "had", "can", "could", "will", "would", "shall", "should", "may", "might", "must",
];

const ADVERBS: &[&str] = &[
    "not", "very", "also", "always", "never", "often", "sometimes", "usually", "only", "just",
    "then", "there", "here", "too", "quite", "rather", "really", "still", "already", "even",
    "again", "once", "however", "therefore", "thus", "hence", "maybe", "perhaps", "probably",
    "instead", "first", "finally", "next", "now", "soon", "later", "up", "down", "out", "off",
];

const ADJECTIVES: &[&str] = &[
    "small", "smaller", "smallest", "large", "larger", "largest", "big", "bigger", "biggest",
    "great", "greater", "fast", "faster", "fastest", "slow", "slower", "high", "higher", "low",
    "lower", "good", "better", "best", "bad", "worse", "worst", "new", "old", "simple", "easy",
    "hard", "same", "different", "whole", "entire", "full", "empty", "other", "many", "much",
    "few", "last", "efficient", "constant", "any", "certain", "own", "main", "final",
];

const COMMON_VERBS: &[&str] = &[
    "be", "work", "find", "use", "store", "make", "take", "keep", "hold", "contain", "allow",
    "enable", "split", "compare", "return", "point", "run", "go", "get", "put", "give", "call",
    "check", "mean", "need", "help", "become", "repeat", "pick", "move", "look", "insert",
    "delete", "remove", "add", "visit", "traverse", "reach", "wait", "release", "send",
    "receive", "follow", "start", "stop", "require", "provide", "guarantee", "ensure", "let",
    "say", "know", "think", "seem", "try", "handle", "choose", "decide", "guess", "believe",
    "grow", "shrink", "discard", "ignore", "create", "build", "lose", "save", "load",
    "read", "write", "update", "produce", "cause", "happen", "depend", "consist", "belong",
];

const NOUN_EXCEPTIONS: &[&str] = &[
    "interval", "signal", "terminal", "dictionary", "library", "summary", "boundary",
    "variable", "table", "label", "total", "protocol", "arrival", "removal", "retrieval",
    "traversal", "proposal", "potential", "principal", "individual", "material", "tutorial",
];

const ADJECTIVE_SUFFIXES: &[&str] = &[
    "ical", "al", "ic", "ive", "ous", "ful", "less", "able", "ible", "ary",
];

const IRREGULAR: &[(&str, &str)] = &[
    ("children", "child"),
    ("vertices", "vertex"),
    ("indices", "index"),
    ("matrices", "matrix"),
    ("leaves", "leaf"),
    ("analyses", "analysis"),
    ("caches", "cache"),
    ("criteria", "criterion"),
    ("people", "person"),
    ("men", "man"),
    ("women", "woman"),
    ("mice", "mouse"),
    ("data", "data"),
    ("halve", "half"),
    ("halved", "half"),
    ("halving", "half"),
    ("used", "use"),
    ("using", "use"),
    ("cached", "cache"),
    ("caching", "cache"),
    ("routed", "route"),
    ("routing", "route"),
];

const NO_STRIP: &[&str] = &[
    "always", "perhaps", "thus", "whereas", "series", "species", "news", "plus", "yes", "bias",
    "lens", "towards", "afterwards", "sometimes", "various", "previous", "mathematics",
    "physics", "dynamics", "ethics", "its", "has", "was", "does", "is", "this", "process",
    "during", "nothing", "something", "anything", "everything", "ceiling", "morning",
    "evening", "sibling", "embed", "hundred", "naked", "sacred", "wicked", "infrared",
];

/// Stems that end like a dropped final `e` but are complete words.
const BARE_STEMS: &[&str] = &[
    "repeat", "treat", "threat", "beat", "heat", "seat", "cheat", "float", "bias", "sync",
    "develop", "envelop", "target", "budget", "market", "ticket", "monitor", "factor",
    "vector", "mirror", "color", "anchor", "honor", "favor", "error",
];

const ABBREVIATIONS: &[&str] = &["e.g", "i.e", "etc", "vs", "cf", "mr", "mrs", "dr", "approx"];

/// Reduce a lowercase word to a conservative base form.
///
/// Plurals and verb inflections are folded ("halves" -> "half", "sorted" ->
/// "sort", "dividing" -> "divide") so that morphological variants of a term
/// share one base form.
pub fn lemmatize(lower: &str) -> String {
    let word = lower
        .strip_suffix("'s")
        .or_else(|| lower.strip_suffix("\u{2019}s"))
        .or_else(|| lower.strip_suffix('\''))
        .unwrap_or(lower);

    if let Some((_, base)) = IRREGULAR.iter().find(|(w, _)| *w == word) {
        return (*base).to_string();
    }
    if word.chars().count() <= 3 || NO_STRIP.contains(&word) {
        return word.to_string();
    }
    let singular = singularize(word);
    if NO_STRIP.contains(&singular.as_str()) {
        return singular;
    }
    strip_inflection(&singular).unwrap_or(singular)
}

fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if stem.len() > 1 {
            return format!("{stem}y");
        }
    }
    if word.ends_with("lves") && !word.ends_with("olves") {
        return format!("{}f", &word[..word.len() - 3]);
    }
    if word.ends_with("sses") {
        return word[..word.len() - 2].to_string();
    }
    for suffix in ["xes", "ches", "shes", "zzes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with('s')
        && !word.ends_with("ss")
        && !word.ends_with("us")
        && !word.ends_with("is")
        && !word.ends_with("ous")
    {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Base form of an `-ing` / `-ed` / `-ied` verb form, if the word is one.
fn strip_inflection(word: &str) -> Option<String> {
    if let Some(stem) = word.strip_suffix("ied") {
        return (stem.chars().count() >= 2).then(|| format!("{stem}y"));
    }
    let stem = word
        .strip_suffix("ing")
        .or_else(|| word.strip_suffix("ed").filter(|s| !s.ends_with('e')))?;
    let chars: Vec<char> = stem.chars().collect();
    let n = chars.len();
    let has_vowel = chars
        .iter()
        .enumerate()
        .any(|(i, c)| is_vowel(*c) || (i > 0 && *c == 'y'));
    if n < 3 || !has_vowel {
        return None;
    }

    let (last, prev) = (chars[n - 1], chars[n - 2]);
    if n >= 4 && last == prev && !is_vowel(last) && !matches!(last, 'l' | 's' | 'z') {
        // stopped -> stop, mapping -> map
        return Some(stem[..stem.len() - last.len_utf8()].to_string());
    }
    if !BARE_STEMS.contains(&stem) && needs_final_e(&chars) {
        return Some(format!("{stem}e"));
    }
    Some(stem.to_string())
}

/// Whether a stripped stem lost a silent final `e` ("divid", "compar",
/// "balanc", "enabl").
fn needs_final_e(chars: &[char]) -> bool {
    let n = chars.len();
    let (last, prev, before) = (chars[n - 1], chars[n - 2], chars[n - 3]);
    // consonant, single vowel, consonant
    let short = (is_vowel(prev) || prev == 'y') && !is_vowel(before);
    match last {
        'v' | 'z' | 'c' | 'u' => true,
        'g' => matches!(prev, 'r' | 'd'),
        'l' => {
            (!is_vowel(prev) && !matches!(prev, 'l' | 'r' | 'w'))
                || (prev == 'u' && !is_vowel(before))
        }
        's' => {
            matches!(prev, 'r' | 'n' | 'p')
                || (is_vowel(prev) && !matches!(prev, 'u' | 'i'))
        }
        't' => prev == 'a' || (matches!(prev, 'u' | 'e') && !is_vowel(before)),
        'd' => short && prev != 'e',
        'r' => (short && matches!(prev, 'a' | 'o' | 'u')) || (prev == 'i' && before == 'u'),
        'n' => prev == 'i' && !is_vowel(before),
        'm' => short && matches!(prev, 'a' | 'i' | 'u'),
        'k' | 'p' | 'b' => short && prev != 'e',
        _ => false,
    }
}

/// Deterministic, rule-based normalizer.
///
/// Built once with the technical vocabulary of the knowledge store; single
/// word terms are never treated as stopwords and always tag as nouns, and
/// multi-word terms are picked up as key terms wherever they appear.
#[derive(Debug, Clone, Default)]
pub struct TextNormalizer {
    technical_words: HashSet<String>,
    technical_phrases: Vec<Vec<String>>,
}

/// A raw token before tagging: byte span relative to the full text.
struct RawToken {
    start: usize,
    end: usize,
    notation: bool,
}

impl TextNormalizer {
    pub fn new<I, S>(vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut technical_words = HashSet::new();
        let mut technical_phrases = Vec::new();
        for term in vocabulary {
            let lemmas = term_lemmas(term.as_ref());
            match lemmas.len() {
                0 => {}
                1 => {
                    technical_words.extend(lemmas);
                }
                _ => {
                    if !technical_phrases.contains(&lemmas) {
                        technical_phrases.push(lemmas);
                    }
                }
            }
        }
        Self {
            technical_words,
            technical_phrases,
        }
    }

    pub fn normalize(&self, raw: &str) -> NormalizedText {
        let mut sentences = Vec::new();
        for span in split_sentences(raw) {
            let raw_tokens = tokenize(raw, span);
            if raw_tokens.is_empty() {
                continue;
            }
            let tokens = self.tag(raw, &raw_tokens);
            sentences.push(Sentence {
                text: raw[span.start..span.end].to_string(),
                span,
                tokens,
            });
        }

        let word_count: usize = sentences.iter().map(|s| s.tokens.len()).sum();
        let long_words = sentences
            .iter()
            .flat_map(|s| s.tokens.iter())
            .filter(|t| t.lower.chars().count() > 6)
            .count();
        let complexity_ratio = if word_count == 0 {
            0.0
        } else {
            long_words as f64 / word_count as f64
        };
        let content_lemmas = sentences
            .iter()
            .flat_map(|s| s.tokens.iter())
            .filter(|t| !t.is_stopword)
            .map(|t| t.lemma.clone())
            .collect();
        let key_terms = self.extract_key_terms(&sentences);

        NormalizedText {
            sentence_count: sentences.len(),
            sentences,
            content_lemmas,
            key_terms,
            word_count,
            complexity_ratio,
        }
    }

    /// Whether a lemma belongs to the technical vocabulary.
    pub fn is_technical(&self, lemma: &str) -> bool {
        self.technical_words.contains(lemma)
    }

    fn tag(&self, raw: &str, raw_tokens: &[RawToken]) -> Vec<Token> {
        let mut tokens: Vec<Token> = Vec::with_capacity(raw_tokens.len());
        for (i, rt) in raw_tokens.iter().enumerate() {
            let text = &raw[rt.start..rt.end];
            let lower: String = if rt.notation {
                text.chars()
                    .filter(|c| !c.is_whitespace())
                    .flat_map(char::to_lowercase)
                    .collect()
            } else {
                text.to_lowercase()
            };
            let lemma = if rt.notation {
                lower.clone()
            } else {
                lemmatize(&lower)
            };
            let technical = self.technical_words.contains(&lemma);
            let prev = tokens.last().map(|t| t.pos);
            let pos = if rt.notation || technical {
                PosTag::Noun
            } else {
                guess_pos(&lower, &lemma, prev, i == 0)
            };
            let is_stopword = !technical && STOPWORDS.contains(&lower.as_str());
            tokens.push(Token {
                text: text.to_string(),
                lower,
                lemma,
                pos,
                span: Span {
                    start: rt.start,
                    end: rt.end,
                },
                is_stopword,
            });
        }
        tokens
    }

    fn extract_key_terms(&self, sentences: &[Sentence]) -> Vec<String> {
        // term -> (count, first occurrence)
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        let mut order = 0usize;
        let mut bump = |term: String, counts: &mut HashMap<String, (usize, usize)>| {
            let entry = counts.entry(term).or_insert((0, order));
            entry.0 += 1;
            order += 1;
        };

        for sentence in sentences {
            let mut chunk_phrases: HashSet<String> = HashSet::new();
            let mut run: Vec<&Token> = Vec::new();
            let tokens = &sentence.tokens;
            for idx in 0..=tokens.len() {
                let token = tokens.get(idx);
                let continues = token.is_some_and(|t| {
                    !t.is_stopword && matches!(t.pos, PosTag::Noun | PosTag::Adjective)
                });
                if continues {
                    if let Some(t) = token {
                        run.push(t);
                    }
                    continue;
                }
                while run.last().is_some_and(|t| t.pos != PosTag::Noun) {
                    run.pop();
                }
                if run.len() >= 2 {
                    let tail = &run[run.len().saturating_sub(MAX_PHRASE_TOKENS)..];
                    let phrase = tail
                        .iter()
                        .map(|t| t.lemma.as_str())
                        .collect::<Vec<_>>()
                        .join(" ");
                    chunk_phrases.insert(phrase.clone());
                    bump(phrase, &mut counts);
                }
                for t in &run {
                    if t.pos == PosTag::Noun && t.lemma.chars().count() > 2 {
                        bump(t.lemma.clone(), &mut counts);
                    }
                }
                run.clear();
            }

            let lemmas = sentence.lemmas();
            for phrase in &self.technical_phrases {
                let joined = phrase.join(" ");
                if chunk_phrases.contains(&joined) {
                    continue;
                }
                let occurrences = lemmas
                    .windows(phrase.len())
                    .filter(|w| w.iter().zip(phrase).all(|(a, b)| *a == b.as_str()))
                    .count();
                for _ in 0..occurrences {
                    bump(joined.clone(), &mut counts);
                }
            }
        }

        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        ranked
            .into_iter()
            .take(MAX_KEY_TERMS)
            .map(|(term, _)| term)
            .collect()
    }
}

/// Base forms of a vocabulary term or phrase, in order.
pub fn term_lemmas(term: &str) -> Vec<String> {
    let span = Span {
        start: 0,
        end: term.len(),
    };
    tokenize(term, span)
        .into_iter()
        .map(|rt| {
            let text = &term[rt.start..rt.end];
            if rt.notation {
                text.chars()
                    .filter(|c| !c.is_whitespace())
                    .flat_map(char::to_lowercase)
                    .collect()
            } else {
                lemmatize(&text.to_lowercase())
            }
        })
        .collect()
}

/// Returns whether a lowercase word is on the stopword list.
pub fn is_stopword(lower: &str) -> bool {
    STOPWORDS.contains(&lower)
}

fn guess_pos(lower: &str, lemma: &str, prev: Option<PosTag>, first: bool) -> PosTag {
    let w = lower;
    // inflected verb forms are tagged by their suffix rules below
    let lemma = if w.ends_with("ing") || w.ends_with("ings") || w.ends_with("ed") {
        w
    } else {
        lemma
    };
    if w.chars().all(|c| c.is_ascii_digit()) {
        return PosTag::Number;
    }
    if DETERMINERS.contains(&w) {
        return PosTag::Determiner;
    }
    if PRONOUNS.contains(&w) {
        return PosTag::Pronoun;
    }
    if AUXILIARIES.contains(&w) {
        return PosTag::Verb;
    }
    if CONJUNCTIONS.contains(&w) {
        return PosTag::Conjunction;
    }
    if PREPOSITIONS.contains(&w) {
        return PosTag::Preposition;
    }
    if ADVERBS.contains(&w) {
        return PosTag::Adverb;
    }
    if ADJECTIVES.contains(&w) {
        return PosTag::Adjective;
    }
    if NOUN_EXCEPTIONS.contains(&lemma) {
        return PosTag::Noun;
    }
    if COMMON_VERBS.contains(&lemma) {
        // "the search", "a call": a determiner in front makes it a noun
        return match prev {
            Some(PosTag::Determiner) | Some(PosTag::Adjective) => PosTag::Noun,
            _ => PosTag::Verb,
        };
    }
    let len = w.chars().count();
    if len > 4 && w.ends_with("ly") {
        return PosTag::Adverb;
    }
    if len > 5 && w.ends_with("ing") {
        return match prev {
            Some(PosTag::Determiner) | Some(PosTag::Adjective) | Some(PosTag::Preposition) => {
                PosTag::Noun
            }
            _ => PosTag::Verb,
        };
    }
    if len > 4 && w.ends_with("ed") {
        return match prev {
            Some(PosTag::Determiner) | Some(PosTag::Preposition) | Some(PosTag::Adjective) => {
                PosTag::Adjective
            }
            None if first => PosTag::Adjective,
            _ => PosTag::Verb,
        };
    }
    if len > 4 && ADJECTIVE_SUFFIXES.iter().any(|s| w.ends_with(s)) {
        return PosTag::Adjective;
    }
    PosTag::Noun
}

/// Split text into trimmed sentence spans.
fn split_sentences(raw: &str) -> Vec<Span> {
    let chars: Vec<(usize, char)> = raw.char_indices().collect();
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let terminal = matches!(c, '.' | '!' | '?');
        let paragraph = c == '\n' && chars.get(i + 1).is_some_and(|(_, n)| *n == '\n');
        if !terminal && !paragraph {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        if terminal {
            while j < chars.len() && matches!(chars[j].1, '.' | '!' | '?' | '"' | '\'' | ')') {
                j += 1;
            }
            let at_boundary = j == chars.len() || chars[j].1.is_whitespace();
            if !at_boundary || (c == '.' && ends_with_abbreviation(&raw[start..pos])) {
                i = j;
                continue;
            }
        }

        let end = chars.get(j).map(|(p, _)| *p).unwrap_or(raw.len());
        push_trimmed(raw, start, end, &mut spans);
        start = end;
        i = j;
    }
    push_trimmed(raw, start, raw.len(), &mut spans);
    spans
}

fn push_trimmed(raw: &str, start: usize, end: usize, spans: &mut Vec<Span>) {
    let slice = &raw[start..end];
    let leading = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let s = start + leading;
    spans.push(Span {
        start: s,
        end: s + trimmed.len(),
    });
}

fn ends_with_abbreviation(text: &str) -> bool {
    let last = text
        .rsplit(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_lowercase();
    ABBREVIATIONS.contains(&last.as_str())
}

/// Tokenize one span: alphanumeric runs with inner apostrophes, plus
/// big-O notation such as `O(n log n)` as a single token. Hyphens and
/// slashes separate tokens, so "divide-and-conquer" yields three words.
fn tokenize(raw: &str, span: Span) -> Vec<RawToken> {
    let text = &raw[span.start..span.end];
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if !c.is_alphanumeric() {
            i += 1;
            continue;
        }

        let standalone = i == 0 || !chars[i - 1].1.is_alphanumeric();
        if standalone && (c == 'o' || c == 'O') && chars.get(i + 1).is_some_and(|(_, n)| *n == '(')
        {
            if let Some(close) = matching_paren(&chars, i + 1) {
                let end = chars[close].0 + 1;
                tokens.push(RawToken {
                    start: span.start + pos,
                    end: span.start + end,
                    notation: true,
                });
                i = close + 1;
                continue;
            }
        }

        let mut j = i + 1;
        while j < chars.len() {
            let ch = chars[j].1;
            let inner_apostrophe = (ch == '\'' || ch == '\u{2019}')
                && chars.get(j + 1).is_some_and(|(_, n)| n.is_alphanumeric());
            if ch.is_alphanumeric() || inner_apostrophe {
                j += 1;
            } else {
                break;
            }
        }
        let end = chars.get(j).map(|(p, _)| *p).unwrap_or(text.len());
        tokens.push(RawToken {
            start: span.start + pos,
            end: span.start + end,
            notation: false,
        });
        i = j;
    }
    tokens
}

fn matching_paren(chars: &[(usize, char)], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (k, (_, c)) in chars.iter().enumerate().skip(open).take(32) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(k);
                }
            }
            _ => {}
        }
    }
    None
}
