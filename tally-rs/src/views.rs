//! Renders the HTML pages.
//!
//! Every dynamic value is passed through [escape] before it ends up in the markup. Links to
//! parties are percent-encoded, as party names commonly contain non-ASCII characters.
use std::borrow::Cow;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::model::{Candidate, CandidateDetail, PartyDetail, RankedCandidate, Sex, SexTotals};

/// Escapes the HTML special characters of the given text.
///
/// # Example
/// ```
/// # use tally::views::escape;
/// assert_eq!(escape("<b>Tom & Jerry</b>"), "&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;");
/// assert_eq!(escape("plain"), "plain");
/// ```
pub fn escape(text: &str) -> Cow<str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut result = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#39;"),
            _ => result.push(ch),
        }
    }

    Cow::Owned(result)
}

fn candidate_link(candidate: &Candidate) -> String {
    format!(
        "<a href=\"/candidates/{}\">{}</a>",
        candidate.id,
        escape(&candidate.name)
    )
}

fn party_link(party: &str) -> String {
    format!(
        "<a href=\"/political_parties/{}\">{}</a>",
        utf8_percent_encode(party, NON_ALPHANUMERIC),
        escape(party)
    )
}

fn keyword_list(keywords: &[String]) -> String {
    let mut html = String::from("<ul class=\"keywords\">");
    for keyword in keywords {
        html.push_str(&format!("<li>{}</li>", escape(keyword)));
    }
    html.push_str("</ul>");

    html
}

fn layout(title: &str, content: &str) -> String {
    format!(
        "<!DOCTYPE html>
<html lang=\"ja\">
<head>
<meta charset=\"utf-8\">
<title>{}</title>
</head>
<body>
<nav><a href=\"/\">選挙結果</a> | <a href=\"/vote\">投票する</a></nav>
<h1>{}</h1>
{}
</body>
</html>
",
        escape(title),
        escape(title),
        content
    )
}

/// Renders the home page.
pub fn home(ranking: &[RankedCandidate], parties: &[(String, i64)], sexes: &SexTotals) -> String {
    let mut content = String::from(
        "<h2>候補者ランキング</h2>\n<table id=\"ranking\">\n<tr><th>順位</th><th>候補者</th><th>政党</th><th>得票数</th></tr>\n",
    );
    for (index, entry) in ranking.iter().enumerate() {
        content.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            index + 1,
            candidate_link(&entry.candidate),
            party_link(&entry.candidate.political_party),
            entry.votes
        ));
    }
    content.push_str("</table>\n");

    content.push_str(
        "<h2>政党ランキング</h2>\n<table id=\"parties\">\n<tr><th>政党</th><th>得票数</th></tr>\n",
    );
    for (party, votes) in parties {
        content.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            party_link(party),
            votes
        ));
    }
    content.push_str("</table>\n");

    content.push_str("<h2>男女比率</h2>\n<table id=\"sexes\">\n");
    for sex in Sex::ALL {
        content.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            sex.label(),
            sexes.get(sex)
        ));
    }
    content.push_str("</table>\n");

    layout("選挙結果", &content)
}

/// Renders the page of a candidate.
pub fn candidate(detail: &CandidateDetail) -> String {
    let content = format!(
        "<dl>
<dt>得票数</dt><dd id=\"votes\">{}</dd>
<dt>政党</dt><dd>{}</dd>
<dt>性別</dt><dd>{}</dd>
</dl>
<h2>支持者の声</h2>
{}
",
        detail.votes,
        party_link(&detail.candidate.political_party),
        detail.candidate.sex.label(),
        keyword_list(&detail.keywords)
    );

    layout(&detail.candidate.name, &content)
}

/// Renders the page of a party.
pub fn party(detail: &PartyDetail) -> String {
    let mut content = format!(
        "<dl>\n<dt>得票数</dt><dd id=\"votes\">{}</dd>\n</dl>\n<h2>党員</h2>\n<ul class=\"candidates\">",
        detail.votes
    );
    for candidate in &detail.candidates {
        content.push_str(&format!("<li>{}</li>", candidate_link(candidate)));
    }
    content.push_str("</ul>\n<h2>支持者の声</h2>\n");
    content.push_str(&keyword_list(&detail.keywords));

    layout(&detail.name, &content)
}

/// Renders the vote form along with the given message.
pub fn vote_form(candidates: &[Candidate], message: &str) -> String {
    let mut options = String::new();
    for candidate in candidates {
        options.push_str(&format!(
            "<option value=\"{}\">{}</option>",
            escape(&candidate.name),
            escape(&candidate.name)
        ));
    }

    let content = format!(
        "<p id=\"message\">{}</p>
<form method=\"post\" action=\"/vote\">
<label>氏名 <input type=\"text\" name=\"name\"></label>
<label>住所 <input type=\"text\" name=\"address\"></label>
<label>マイナンバー <input type=\"text\" name=\"mynumber\"></label>
<label>候補者 <select name=\"candidate\">{}</select></label>
<label>投票理由 <input type=\"text\" name=\"keyword\"></label>
<label>投票数 <input type=\"number\" name=\"vote_count\" min=\"1\"></label>
<button type=\"submit\">投票</button>
</form>
",
        escape(message),
        options
    );

    layout("投票", &content)
}

#[cfg(test)]
mod tests {
    use crate::model::{Candidate, CandidateDetail, PartyDetail, RankedCandidate, Sex, SexTotals};
    use crate::views;

    fn candidate() -> Candidate {
        Candidate {
            id: 7,
            name: "<Bob>".to_owned(),
            political_party: "緑の党".to_owned(),
            sex: Sex::Female,
        }
    }

    #[test]
    fn home_lists_all_sections() {
        let html = views::home(
            &[RankedCandidate {
                candidate: candidate(),
                votes: 3,
            }],
            &[("緑の党".to_owned(), 3)],
            &SexTotals { male: 0, female: 3 },
        );

        assert_eq!(html.contains("<a href=\"/candidates/7\">&lt;Bob&gt;</a>"), true);
        assert_eq!(
            html.contains("<a href=\"/political_parties/%E7%B7%91%E3%81%AE%E5%85%9A\">緑の党</a>"),
            true
        );
        assert_eq!(html.contains("<tr><td>女</td><td>3</td></tr>"), true);
        assert_eq!(html.contains("<Bob>"), false);
    }

    #[test]
    fn details_contain_keywords() {
        let html = views::candidate(&CandidateDetail {
            candidate: candidate(),
            votes: 3,
            keywords: vec!["jobs & taxes".to_owned()],
        });
        assert_eq!(html.contains("<title>&lt;Bob&gt;</title>"), true);
        assert_eq!(html.contains("<li>jobs &amp; taxes</li>"), true);

        let html = views::party(&PartyDetail {
            name: "緑の党".to_owned(),
            votes: 3,
            candidates: vec![candidate()],
            keywords: Vec::new(),
        });
        assert_eq!(html.contains("<dd id=\"votes\">3</dd>"), true);
        assert_eq!(html.contains("/candidates/7"), true);
    }

    #[test]
    fn vote_form_shows_message_and_candidates() {
        let html = views::vote_form(&[candidate()], "投票に成功しました");
        assert_eq!(html.contains("<p id=\"message\">投票に成功しました</p>"), true);
        assert_eq!(html.contains("<option value=\"&lt;Bob&gt;\">"), true);
    }
}
