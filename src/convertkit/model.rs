use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct BroadcastResp {
    pub broadcast: Broadcast,
}

#[derive(Deserialize, Debug)]
pub struct Broadcast {
    pub id: u64,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: u64,
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct TagsResp {
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Deserialize, Debug)]
pub struct SubscribeResp {
    pub subscription: Subscription,
}

#[derive(Deserialize, Debug)]
pub struct Subscription {
    pub id: u64,
}
