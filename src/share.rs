use url::{form_urlencoded, Url};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareTarget {
    Twitter,
    Facebook,
    LinkedIn,
}

pub const TARGETS: [ShareTarget; 3] = [
    ShareTarget::Twitter,
    ShareTarget::Facebook,
    ShareTarget::LinkedIn,
];

impl ShareTarget {
    pub fn name(self) -> &'static str {
        match self {
            ShareTarget::Twitter => "Twitter",
            ShareTarget::Facebook => "Facebook",
            ShareTarget::LinkedIn => "LinkedIn",
        }
    }

    /// Link that opens the network's share dialog for `page`.
    pub fn link(self, page: &Url, title: &str) -> Result<Url, Error> {
        let (base, query) = match self {
            ShareTarget::Twitter => (
                "https://twitter.com/intent/tweet",
                encode(&[("url", page.as_str()), ("text", title)]),
            ),
            ShareTarget::Facebook => (
                "https://www.facebook.com/sharer/sharer.php",
                encode(&[("u", page.as_str())]),
            ),
            ShareTarget::LinkedIn => (
                "https://www.linkedin.com/sharing/share-offsite/",
                encode(&[("url", page.as_str())]),
            ),
        };
        let mut url = Url::parse(base)?;
        url.set_query(Some(&query));
        Ok(url)
    }
}

fn encode(pairs: &[(&str, &str)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter())
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_escape_page_and_title() {
        let page: Url = "https://blog.example.com/post/42".parse().unwrap();
        let link = ShareTarget::Twitter.link(&page, "Rust & yoga").unwrap();
        assert_eq!(link.path(), "/intent/tweet");
        assert_eq!(
            link.query(),
            Some("url=https%3A%2F%2Fblog.example.com%2Fpost%2F42&text=Rust+%26+yoga")
        );

        let link = ShareTarget::Facebook.link(&page, "ignored").unwrap();
        let pairs: Vec<(String, String)> = link.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("u".to_string(), page.to_string())]);
    }

    #[test]
    fn every_target_builds() {
        let page: Url = "https://blog.example.com/".parse().unwrap();
        for target in TARGETS.iter() {
            let link = target.link(&page, "t").unwrap();
            assert_eq!(link.scheme(), "https", "{}", target.name());
        }
    }
}
