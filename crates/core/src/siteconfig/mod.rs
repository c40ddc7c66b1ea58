//! Site specific extraction rules.
//!
//! Rule files are looked up per host in layered folders, merged, and applied
//! to the extraction by the processors in [`processors`].

pub mod directives;
pub mod loader;
pub mod parser;
pub mod processors;

pub use directives::{Directive, FilterTest, SiteConfig};
pub use loader::{ConfigFolder, ConfigLoader, ConfigLoaderBuilder, default_folders, normalize_host, resolve};
pub use parser::{ConfigFormat, ConfigParser};
pub use processors::{
    CONFIG_KEY, ExtractAuthor, ExtractBody, ExtractDate, FindContentPage, FindNextPage, GoToNextPage,
    LoadConfiguration, NEXT_PAGE_KEY, ReplaceStrings, StripTags,
};
