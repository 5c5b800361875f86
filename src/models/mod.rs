//! Data models
//!
//! Database entities, API inputs and the small value types shared between
//! services: blog posts, social posts, newsletter subscribers and campaigns,
//! FAQ entries, pages, content sections, automation rules and admin users.

mod automation;
mod blog_post;
mod common;
mod content_section;
mod faq;
mod newsletter;
mod page;
mod session;
mod social_post;
mod user;

pub use automation::{
    Action, AutomationEvent, AutomationLog, AutomationRule, Condition, ConditionOperator,
    CreateRuleInput, LogStatus, TriggerType, UpdateRuleInput,
};
pub use blog_post::{BlogPost, BlogPostStatus, CreateBlogPostInput, UpdateBlogPostInput};
pub use common::{ListParams, PagedResult};
pub use content_section::{ContentSection, CreateContentSectionInput, UpdateContentSectionInput};
pub use faq::{CreateFaqInput, Faq, UpdateFaqInput};
pub use newsletter::{
    Campaign, CampaignStats, CampaignStatus, CreateCampaignInput, SubscribeInput, Subscriber,
    SubscriberCounts, SubscriberStatus, UpdateCampaignInput,
};
pub use page::{CreatePageInput, Page, PageStatus, UpdatePageInput};
pub use session::{Session, SESSION_TTL_DAYS};
pub use social_post::{
    CreateSocialPostInput, PublishReceipt, SocialPlatform, SocialPost, SocialPostStatus,
    UpdateSocialPostInput,
};
pub use user::{CreateUserInput, User, UserRole};
