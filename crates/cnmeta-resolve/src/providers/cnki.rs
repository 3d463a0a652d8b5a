//! CNKI (China National Knowledge Infrastructure).

use async_trait::async_trait;
use cnmeta_core::{CandidateSet, Page, Record, RecordStore, RequestSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::dom::{DocTools, inject_hidden_input, normalize_whitespace, parse_document, parse_selector};
use crate::error::{ResolveError, Result};
use crate::http::encode_form;
use crate::providers::Provider;
use crate::query::{CNKI_FILENAME_RULES, QueryInput, derive_search_term};

pub const NAME: &str = "cnki";

/// Host converter for CNKI detail pages.
pub const CONVERTER_ID: &str = "5c95b67b-41c5-4f55-b71a-48d5d7183063";

pub const DOMESTIC_SEARCH_URL: &str = "https://kns.cnki.net/kns8s/brief/grid";
pub const OVERSEA_SEARCH_URL: &str = "https://chn.oversea.cnki.net/kns/Brief/GetGridTableHtml";

const DOMESTIC_REFERER: &str = "https://kns.cnki.net/kns8s/AdvSearch?classid=WD0FTY92";
const OVERSEA_REFERER: &str = "https://chn.oversea.cnki.net/kns/AdvSearch?dbcode=CFLS&crossDbcodes=CJFQ,CDMD,CIPD,CCND,CYFD,CCJD,BDZK,CISD,CJFQ,CDMD,CIPD,CCND,CYFD,CCJD,BDZK,CISD,CJFN";

const DOMESTIC_KUAKU_CODE: &str =
    "YSTT4HG0,LSTPFY1C,JUP3MUPD,MPMFIG1A,WQ0UVIAA,BLZOG7CK,EMRPGLPA,PWFIRAGL,NLBO1Z6R,NN3FJMUV";
const DOMESTIC_PRODUCTS: &str = "YSTT4HG0,LSTPFY1C,RMJLXHZ3,JQIRZIYA,JUP3MUPD,1UR4K4HZ,BPBAFJ5S,R79MZMCB,MPMFIG1A,WQ0UVIAA,NB3BWEHK,XVLO76FD,HR1YT1Z9,BLZOG7CK,EMRPGLPA,J708GVCE,ML4DRIDX,PWFIRAGL,NLBO1Z6R,NN3FJMUV";
const OVERSEA_KUAKU_CODE: &str = "CJFQ,CCND,CIPD,CDMD,CYFD,BDZK,CISD,CCJD,CJFN";

/// Detail pages on both the domestic and the overseas sites.
static DETAIL_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/(kns8?s?|kcms2?)/(article/abstract\?|detail/detail\.aspx\?)")
        .expect("valid regex")
});
static DB_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Z])").expect("valid regex"));

pub struct CnkiProvider {
    domestic_url: String,
    oversea_url: String,
}

impl Default for CnkiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CnkiProvider {
    pub fn new() -> Self {
        Self::with_endpoints(DOMESTIC_SEARCH_URL, OVERSEA_SEARCH_URL)
    }

    pub fn with_endpoints(domestic_url: &str, oversea_url: &str) -> Self {
        Self {
            domestic_url: domestic_url.to_string(),
            oversea_url: oversea_url.to_string(),
        }
    }

    pub fn is_detail_url(url: &str) -> bool {
        DETAIL_URL_RE.is_match(url)
    }
}

#[async_trait]
impl Provider for CnkiProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn converter_id(&self) -> &str {
        CONVERTER_ID
    }

    fn build_query(&self, input: &QueryInput, oversea: bool) -> Result<RequestSpec> {
        let filename_term = CNKI_FILENAME_RULES.derive(&input.filename);
        let search_exp = format!("TI%='{}'", derive_search_term(input, &CNKI_FILENAME_RULES));
        info!("search expression: {search_exp}");

        let (url, referer, form) = if oversea {
            (
                &self.oversea_url,
                OVERSEA_REFERER,
                oversea_form(&search_exp),
            )
        } else {
            (
                &self.domestic_url,
                DOMESTIC_REFERER,
                domestic_form(&search_exp, &filename_term),
            )
        };

        Ok(RequestSpec::post(url.as_str(), encode_form(&form))
            .with_header("Host", host_of(url)?)
            .with_header("Referer", referer))
    }

    fn parse_results(&self, page: &Page) -> Result<CandidateSet> {
        let html = parse_document(&page.html);
        let row_selector = parse_selector("table.result-table-list > tbody > tr")?;
        let base = Url::parse(&page.url).ok();

        let mut candidates = CandidateSet::new();
        let mut rows = 0usize;
        for row in html.select(&row_selector) {
            rows += 1;
            let tools = DocTools::new(row);
            let href = tools.attr(".name > a", "href")?;
            let title = tools.text(".name > a")?;
            if href.is_empty() || title.is_empty() {
                continue;
            }
            let summary = [
                title,
                tools.text(".author")?,
                tools.text(".source")?,
                tools.text(".date")?,
            ]
            .join(" | ");
            candidates.insert(absolutize(base.as_ref(), &href), normalize_whitespace(&summary));
        }
        debug!("{rows} result rows, {} candidates", candidates.len());
        Ok(candidates)
    }

    async fn find_snapshot(
        &self,
        record: &Record,
        store: &dyn RecordStore,
    ) -> Result<Option<Record>> {
        if !record.is_webpage() || !record.url.as_deref().is_some_and(Self::is_detail_url) {
            return Ok(None);
        }
        let children = store.children(record.id).await?;
        Ok(children.into_iter().find(|child| {
            child.attachment.as_ref().is_some_and(|a| a.is_snapshot())
                && child.url.as_deref().is_some_and(Self::is_detail_url)
        }))
    }

    /// Expose the document's database code, database name and file name as
    /// hidden `param*` inputs so the converter can address the stored copy.
    fn prepare_snapshot(&self, page: &mut Page) -> Result<()> {
        let (dbcode, dbname, filename) = {
            let html = parse_document(&page.html);
            let selector = parse_selector("input.infocheckbox")?;
            let checkbox = html.select(&selector).next().ok_or_else(|| {
                ResolveError::Parse(format!("no input.infocheckbox in {}", page.url))
            })?;
            let dbcode = checkbox.value().attr("dbcode").unwrap_or_default().to_string();
            let value = checkbox.value().attr("value").unwrap_or_default();
            let mut parts = value.split('!');
            let dbname = parts.next().unwrap_or_default();
            let filename = parts.next().ok_or_else(|| {
                ResolveError::Parse(format!("malformed infocheckbox value {value:?}"))
            })?;
            (
                dbcode,
                DB_PREFIX_RE.replace(dbname, "${1}LAST").into_owned(),
                filename.to_string(),
            )
        };

        inject_hidden_input(&mut page.html, "paramdbcode", &dbcode);
        inject_hidden_input(&mut page.html, "paramdbname", &dbname);
        inject_hidden_input(&mut page.html, "paramfilename", &filename);
        Ok(())
    }
}

fn host_of(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| ResolveError::Parse(format!("invalid search URL {url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ResolveError::Parse(format!("search URL {url} has no host")))?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn absolutize(base: Option<&Url>, href: &str) -> String {
    base.and_then(|b| b.join(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| href.to_string())
}

// ─── Request bodies ───────────────────────────────────────────────────────────

fn domestic_form(search_exp: &str, filename_term: &str) -> Value {
    json!({
        "QueryJson": {
            "Platform": "",
            "Resource": "CROSSDB",
            "Classid": "WD0FTY92",
            "Products": "",
            "QNode": {
                "QGroup": [
                    {
                        "Key": "Subject",
                        "Title": "",
                        "Logic": 0,
                        "Items": [
                            {
                                "Key": "Expert",
                                "Title": "",
                                "Logic": 0,
                                "Field": "EXPERT",
                                "Operator": 0,
                                "Value": search_exp,
                                "Value2": ""
                            }
                        ],
                        "ChildItems": []
                    },
                    {
                        "Key": "ControlGroup",
                        "Title": "",
                        "Logic": 0,
                        "Items": [],
                        "ChildItems": []
                    }
                ]
            },
            "ExScope": 1,
            "SearchType": 8,
            "Rlang": "CHINESE",
            "KuaKuCode": DOMESTIC_KUAKU_CODE
        },
        "boolSearch": true,
        "CurPage": 1,
        "pageNum": 1,
        "pageSize": 20,
        "sortField": "FFD",
        "sortType": "desc",
        "dstyle": "listmode",
        "boolSortSearch": true,
        "sentenceSearch": false,
        "productStr": DOMESTIC_PRODUCTS,
        "aside": format!("(TI%: &#39;{filename_term}&#39;)"),
        "searchFrom": "资源范围：总库;  中英文扩展;  时间范围：更新时间：不限;  "
    })
}

fn oversea_form(search_exp: &str) -> Value {
    json!({
        "QueryJson": {
            "Platform": "",
            "DBCode": "CFLS",
            "QNode": {
                "QGroup": [
                    {
                        "Key": "Subject",
                        "Title": "",
                        "Logic": 4,
                        "Items": [
                            {
                                "Key": "Expert",
                                "Title": "",
                                "Logic": 0,
                                "Name": "",
                                "Operate": "",
                                "Value": search_exp,
                                "ExtendType": 12,
                                "ExtendValue": "中英文对照",
                                "Value2": "",
                                "BlurType": ""
                            }
                        ],
                        "ChildItems": []
                    },
                    {
                        "Key": "ControlGroup",
                        "Title": "",
                        "Logic": 1,
                        "Items": [],
                        "ChildItems": []
                    }
                ]
            },
            "ExScope": 1,
            "CodeLang": "",
            "KuaKuCode": OVERSEA_KUAKU_CODE
        },
        "IsSearch": false,
        "CurPage": 1,
        "RecordsCntPerPage": 20,
        "CurrSortField": "RELEVANT",
        "CurrSortFieldType": "desc",
        "CurDisplayMode": "listmode",
        "IsSentenceSearch": false,
        "KuaKuCodes": OVERSEA_KUAKU_CODE,
        "PageName": "AdvSearch",
        "DBCode": "CFLS",
        "Subject": ""
    })
}
