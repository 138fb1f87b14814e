//! Request verbs, including the patch pseudo-verbs

use reqwest::Method;

/// The verb of an api request
///
/// Beyond the four plain HTTP verbs, the apiserver distinguishes patch
/// flavours by `Content-Type`, so they are modelled as pseudo-verbs here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// GET a resource or collection
    Get,
    /// POST (create)
    Post,
    /// PUT (replace)
    Put,
    /// DELETE a resource or collection
    Delete,
    /// PATCH with the default merge strategy (alias of [`Verb::PatchMerge`])
    Patch,
    /// `application/merge-patch+json`
    PatchMerge,
    /// `application/json-patch+json` (RFC 6902)
    PatchJson,
    /// `application/strategic-merge-patch+json`
    PatchStrategicMerge,
    /// `application/apply-patch+yaml` (server-side apply; body is YAML)
    PatchApply,
}

impl Verb {
    /// The wire method for this verb
    pub fn method(self) -> Method {
        match self {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Put => Method::PUT,
            Verb::Delete => Method::DELETE,
            Verb::Patch
            | Verb::PatchMerge
            | Verb::PatchJson
            | Verb::PatchStrategicMerge
            | Verb::PatchApply => Method::PATCH,
        }
    }

    /// The `Content-Type` sent with bodies for this verb
    pub fn content_type(self) -> &'static str {
        match self {
            Verb::Get | Verb::Post | Verb::Put | Verb::Delete => "application/json",
            Verb::Patch | Verb::PatchMerge => "application/merge-patch+json",
            Verb::PatchJson => "application/json-patch+json",
            Verb::PatchStrategicMerge => "application/strategic-merge-patch+json",
            Verb::PatchApply => "application/apply-patch+yaml",
        }
    }

    /// Whether bodies for this verb serialize as YAML rather than JSON
    pub fn yaml_body(self) -> bool {
        self == Verb::PatchApply
    }
}
