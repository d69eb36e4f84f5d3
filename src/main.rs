extern crate blog_driver as blog;

use std::env;
use std::process;

use dotenv::dotenv;
use tokio::runtime::Runtime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use blog::auth::OAuthProvider;
use blog::comment::CommentService;
use blog::post::{PostId, PostService};
use blog::share::TARGETS;
use blog::{Client, Config, Error, SessionHub, VoteControl, VoteDirection, VoteReducer};

const USAGE: &str = "usage: blog posts | post <id> | vote <id> up|down | \
                     comment <id> <text> | share <id> | oauth-url";

fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if let Err(err) = run(&args) {
        error!("{}", err);
        process::exit(1);
    }
}

fn run(args: &[String]) -> Result<(), Error> {
    let config = Config::from_env()?;
    let client = Client::new(&config, SessionHub::new())?;
    let mut rt = Runtime::new()
        .map_err(|err| Error::Config(format!("unable to start runtime: {}", err)))?;

    if let (Ok(email), Ok(password)) = (env::var("BLOG_EMAIL"), env::var("BLOG_PASSWORD")) {
        let session = rt.block_on(client.sign_in(&email, &password))?;
        info!(user = %session.user.id, "signed in");
    }

    let posts = PostService::new(client.store(), client.storage());
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["posts"] => {
            for post in rt.block_on(posts.fetch_posts())? {
                println!("{}\t{}\t{}", post.id, post.created_at.format("%Y-%m-%d"), post.title);
            }
        }
        ["post", id] => {
            let id = PostId::new(*id);
            let post = rt.block_on(posts.get_post(&id))?;
            let user_id = client.session().user_id();
            let votes = VoteReducer::new(client.store());
            let tally = rt.block_on(votes.load_tally(&id, user_id.as_ref()))?;
            println!("{} ({} votes)", post.title, tally.count);
            if let Some(image) = &post.image_url {
                println!("image: {}", image);
            }
            println!("\n{}\n", post.content);
            for comment in rt.block_on(CommentService::new(client.store()).list(&id))? {
                println!("{}: {}", comment.author_name().unwrap_or("Anonymous"), comment.content);
            }
        }
        ["vote", id, direction] => {
            let direction = match *direction {
                "up" => VoteDirection::Up,
                "down" => VoteDirection::Down,
                _ => return Err(Error::Config(USAGE.to_string())),
            };
            let reducer = VoteReducer::new(client.store());
            let control = VoteControl::new(reducer, client.session().clone(), PostId::new(*id));
            rt.block_on(control.click(direction))?;
            let view = control.view();
            println!("count {} up {} down {}", view.count, view.up_active, view.down_active);
        }
        ["comment", id, text] => {
            let user_id = client.session().user_id();
            let comments = CommentService::new(client.store());
            let comment = rt.block_on(comments.add(user_id.as_ref(), &PostId::new(*id), text))?;
            println!("comment {} added", comment.id);
        }
        ["share", id] => {
            let post = rt.block_on(posts.get_post(&PostId::new(*id)))?;
            let page = config.redirect_url.join(&format!("/post/{}", post.id))?;
            for target in TARGETS.iter() {
                println!("{}: {}", target.name(), target.link(&page, &post.title)?);
            }
        }
        ["oauth-url"] => {
            let pending = client.begin_oauth(OAuthProvider::Google)?;
            println!("{}", pending.authorize_url());
        }
        _ => return Err(Error::Config(USAGE.to_string())),
    }

    rt.block_on(client.sign_out())?;
    Ok(())
}
