// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Turns a test method name into a human-readable title.
///
/// Underscores and camel-case word boundaries become spaces, the first letter is
/// capitalized and the rest of each word is lower-cased, so both
/// `happy_day_scenario` and `happyDayScenario` become `Happy day scenario`.
/// Runs of capitals (acronyms) and digits are kept as written.
pub fn humanize(name: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;
    let chars: Vec<char> = name.chars().collect();

    for (index, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev = None;
            continue;
        }
        let next_is_lower = chars.get(index + 1).is_some_and(|n| n.is_lowercase());
        // `fooBar` splits before `B`; `HTTPHeaders` splits before the second `H`.
        let boundary = match prev {
            Some(p) if p.is_lowercase() || p.is_ascii_digit() => c.is_uppercase(),
            Some(p) if p.is_uppercase() => c.is_uppercase() && next_is_lower,
            _ => false,
        };
        if boundary && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
        prev = Some(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    let mut title = String::with_capacity(name.len());
    for (index, word) in words.iter().enumerate() {
        if index > 0 {
            title.push(' ');
        }
        let is_acronym = word.chars().count() > 1 && word.chars().all(|c| !c.is_lowercase());
        if is_acronym {
            title.push_str(word);
        } else if index == 0 {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                title.extend(first.to_uppercase());
                title.push_str(&chars.as_str().to_lowercase());
            }
        } else {
            title.push_str(&word.to_lowercase());
        }
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("happy_day_scenario", "Happy day scenario" ; "snake case")]
    #[test_case("happyDayScenario", "Happy day scenario" ; "camel case")]
    #[test_case("edge_case_1", "Edge case 1" ; "trailing digit")]
    #[test_case("shouldParseHTTPHeaders", "Should parse HTTP headers" ; "acronym kept")]
    #[test_case("__leading__underscores", "Leading underscores" ; "repeated separators")]
    #[test_case("", "" ; "empty")]
    fn humanizes_method_names(input: &str, expected: &str) {
        assert_eq!(humanize(input), expected);
    }
}
