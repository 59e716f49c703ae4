//! Chaff bytes, decoy vault contents and generated passwords.
//!
//! Everything here draws from the OS CSPRNG. Decoy contents must look like
//! an ordinary, lived-in vault; nothing in them may mark them as synthetic.

use chrono::{Datelike, Duration as ChronoDuration, Utc};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::model::{EntryPayload, NewEntry, VaultData};
use sealvault_crypto::random_bytes;

pub const MIN_DECOY_ENTRIES: usize = 5;
pub const MAX_DECOY_ENTRIES: usize = 10;
pub const MIN_PASSWORD_LEN: usize = 12;
pub const MAX_PASSWORD_LEN: usize = 20;

const PASSWORD_CHARSET: &[u8] =
    b"abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789!@#$%^&*-_=+?";

const FOLDER_NAMES: &[&str] = &["Personal", "Work", "Shopping", "Finance"];

const FIRST_NAMES: &[&str] = &["alex", "sam", "jordan", "taylor", "morgan", "casey", "jamie"];
const LAST_NAMES: &[&str] = &["miller", "garcia", "nguyen", "smith", "kowalski", "okafor", "berg"];
const MAIL_DOMAINS: &[&str] = &["gmail.com", "outlook.com", "proton.me", "yahoo.com"];

enum Template {
    Login { title: &'static str, url: &'static str },
    Note { title: &'static str, content: &'static str },
    Card { title: &'static str },
}

const TEMPLATES: &[Template] = &[
    Template::Login { title: "Gmail", url: "https://mail.google.com" },
    Template::Login { title: "Amazon", url: "https://www.amazon.com" },
    Template::Login { title: "Netflix", url: "https://www.netflix.com" },
    Template::Login { title: "Spotify", url: "https://open.spotify.com" },
    Template::Login { title: "Facebook", url: "https://www.facebook.com" },
    Template::Login { title: "LinkedIn", url: "https://www.linkedin.com" },
    Template::Login { title: "Dropbox", url: "https://www.dropbox.com" },
    Template::Login { title: "eBay", url: "https://www.ebay.com" },
    Template::Login { title: "Home Wi-Fi Router", url: "http://192.168.1.1" },
    Template::Login { title: "Electric Company", url: "https://myaccount.energy.example.com" },
    Template::Note { title: "Wi-Fi password", content: "Guest network: see router label" },
    Template::Note { title: "Gym locker", content: "Locker 114, combination on keyring" },
    Template::Note { title: "Car service", content: "Next oil change at 60k. Tires rotated in spring." },
    Template::Card { title: "Visa" },
    Template::Card { title: "Debit card" },
];

/// `len` random bytes, indistinguishable from ciphertext.
pub fn generate_chaff(len: usize) -> Vec<u8> {
    random_bytes(len)
}

/// Random password of `len` characters, clamped to the supported range.
pub fn generate_password(len: usize) -> String {
    let len = len.clamp(MIN_PASSWORD_LEN, MAX_PASSWORD_LEN);
    (0..len)
        .map(|_| PASSWORD_CHARSET[OsRng.gen_range(0..PASSWORD_CHARSET.len())] as char)
        .collect()
}

fn pick<'a>(items: &'a [&'a str]) -> &'a str {
    items.choose(&mut OsRng).copied().unwrap_or_default()
}

fn random_username() -> String {
    let first = pick(FIRST_NAMES);
    let last = pick(LAST_NAMES);
    match OsRng.gen_range(0..3) {
        0 => format!("{}.{}@{}", first, last, pick(MAIL_DOMAINS)),
        1 => format!("{}{}{}", first, &last[..1], OsRng.gen_range(10..99)),
        _ => format!("{}_{}", first, last),
    }
}

/// 16-digit card number that passes the Luhn check.
fn random_card_number() -> String {
    let mut digits: Vec<u32> = vec![4];
    digits.extend((0..14).map(|_| OsRng.gen_range(0..10)));
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    digits.push((10 - sum % 10) % 10);
    digits
        .iter()
        .filter_map(|d| char::from_digit(*d, 10))
        .collect()
}

fn payload_for(template: &Template) -> (String, EntryPayload) {
    match template {
        Template::Login { title, url } => (
            title.to_string(),
            EntryPayload::Login {
                username: random_username(),
                password: generate_password(OsRng.gen_range(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN)),
                url: Some(url.to_string()),
                totp_secret: None,
            },
        ),
        Template::Note { title, content } => (
            title.to_string(),
            EntryPayload::Note {
                content: content.to_string(),
            },
        ),
        Template::Card { title } => {
            let year = Utc::now().year().rem_euclid(100) as u32 + OsRng.gen_range(1..5);
            (
                title.to_string(),
                EntryPayload::Card {
                    holder: format!("{} {}", capitalize(pick(FIRST_NAMES)), capitalize(pick(LAST_NAMES))),
                    number: random_card_number(),
                    expiry: format!("{:02}/{:02}", OsRng.gen_range(1..=12), year % 100),
                    cvv: format!("{:03}", OsRng.gen_range(0..1000)),
                },
            )
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Plausible vault with 5 to 10 entries, a few folders and back-dated
/// timestamps.
pub fn generate_decoy_vault(name: &str) -> VaultData {
    let mut data = VaultData::new(name);
    let now = Utc::now();
    let age_days = OsRng.gen_range(90..720);
    data.metadata.created_at = now - ChronoDuration::days(age_days);

    let folder_count = OsRng.gen_range(1..=2);
    let mut folder_names: Vec<&str> = FOLDER_NAMES.to_vec();
    folder_names.shuffle(&mut OsRng);
    let mut folder_ids = Vec::new();
    for folder_name in folder_names.into_iter().take(folder_count) {
        if let Ok(folder) = data.add_folder(folder_name, None) {
            folder_ids.push(folder.id);
        }
    }

    let mut pool: Vec<&Template> = TEMPLATES.iter().collect();
    pool.shuffle(&mut OsRng);
    let count = OsRng.gen_range(MIN_DECOY_ENTRIES..=MAX_DECOY_ENTRIES);

    for template in pool.into_iter().take(count) {
        let (title, payload) = payload_for(template);
        let mut new = NewEntry::new(title, payload).favorite(OsRng.gen_bool(0.2));
        if !folder_ids.is_empty() && OsRng.gen_bool(0.5) {
            new.folder_id = folder_ids.choose(&mut OsRng).cloned();
        }
        if data.add_entry(new).is_err() {
            continue;
        }
        if let Some(entry) = data.entries.last_mut() {
            let created = now - ChronoDuration::days(OsRng.gen_range(1..age_days));
            let since = (now - created).num_days().max(1);
            entry.created_at = created;
            entry.modified_at = created + ChronoDuration::days(OsRng.gen_range(0..since));
        }
    }

    let created = data.metadata.created_at;
    for folder in data.folders.iter_mut() {
        folder.created_at = created;
        folder.modified_at = created;
    }
    data.metadata.modified_at = data
        .entries
        .iter()
        .map(|e| e.modified_at)
        .max()
        .unwrap_or(created);
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_chaff_length_and_variety() {
        let a = generate_chaff(512);
        let b = generate_chaff(512);
        assert_eq!(a.len(), 512);
        assert_ne!(a, b);
    }

    #[test]
    fn test_password_length_clamped() {
        assert_eq!(generate_password(4).len(), MIN_PASSWORD_LEN);
        assert_eq!(generate_password(64).len(), MAX_PASSWORD_LEN);
        assert_eq!(generate_password(16).len(), 16);

        let pw = generate_password(16);
        assert!(pw.bytes().all(|b| PASSWORD_CHARSET.contains(&b)));
    }

    #[test]
    fn test_decoy_shape() {
        for _ in 0..20 {
            let decoy = generate_decoy_vault("Personal");
            assert_eq!(decoy.metadata.name, "Personal");
            assert!((MIN_DECOY_ENTRIES..=MAX_DECOY_ENTRIES).contains(&decoy.entries.len()));
            assert!(!decoy.folders.is_empty());

            let titles: HashSet<_> = decoy.entries.iter().map(|e| e.title.as_str()).collect();
            assert_eq!(titles.len(), decoy.entries.len());

            for entry in &decoy.entries {
                assert!(entry.created_at >= decoy.metadata.created_at);
                assert!(entry.modified_at >= entry.created_at);
                assert!(entry.modified_at <= Utc::now());
                if let Some(folder) = &entry.folder_id {
                    assert!(decoy.folder(folder).is_some());
                }
            }
        }
    }

    #[test]
    fn test_decoys_differ() {
        let a = generate_decoy_vault("v");
        let b = generate_decoy_vault("v");
        assert_ne!(a, b);
    }

    #[test]
    fn test_card_numbers_pass_luhn() {
        for _ in 0..50 {
            let number = random_card_number();
            assert_eq!(number.len(), 16);
            let sum: u32 = number
                .chars()
                .rev()
                .filter_map(|c| c.to_digit(10))
                .enumerate()
                .map(|(i, d)| if i % 2 == 1 { let x = d * 2; if x > 9 { x - 9 } else { x } } else { d })
                .sum();
            assert_eq!(sum % 10, 0);
        }
    }
}
